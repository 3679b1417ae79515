mod common;

use common::prelude::*;

#[tokio::test]
async fn upload_happy_path() -> anyhow::Result<()> {
    let docker = Cli::default();
    let (harness, _db_container) = spawn_app(&docker).await?;
    let app = harness.app.clone();
    let db = app.database.clone();

    let (photographer_id, event_id) = seed_event(&db).await?;
    grant_credits(&db, photographer_id, 5, 30).await?;
    let (intent_id, key) = seed_intent(&db, photographer_id, event_id, 1).await?;

    let original = common::png_bytes(320, 200);
    app.storage.put_jpeg(&key, original.clone()).await?;
    db.enqueue_upload_event(
        "PutObject",
        "photos-test",
        &key,
        original.len() as i64,
        None,
        Utc::now(),
    )
    .await?;

    tokio::spawn(tasks::process_uploads::process_uploads(app.clone()));

    eventually(Duration::from_secs(30), || {
        let db = db.clone();
        let key = key.clone();
        async move {
            let intent = db.get_intent_by_key(&key).await?.unwrap();
            Ok(intent.status == IntentStatus::Completed)
        }
    })
    .await?;

    let intent = db.get_intent_by_key(&key).await?.unwrap();
    assert_eq!(intent.id, intent_id);
    assert!(intent.completed_at.is_some());

    // One photo row in `uploading`, carrying the normalized metadata.
    let photo_id = intent.photo_id.expect("completed intent must have a photo");
    let photo = db.get_photo(photo_id).await?.unwrap();
    assert_eq!(photo.status, PhotoStatus::Uploading);
    assert_eq!(photo.width, Some(320));
    assert_eq!(photo.height, Some(200));
    assert_eq!(photo.original_mime_type.as_deref(), Some("image/png"));
    assert_eq!(photo.r2_key, storage::photo_key(event_id, photo_id));

    // Exactly one credit consumed, inheriting the grant's expiration.
    assert_eq!(db.photographer_balance(photographer_id).await?, 4);

    // An indexing job awaits, the notification is settled.
    assert_eq!(db.count_photo_jobs().await?, 1);
    assert_eq!(db.count_upload_events().await?, 0);

    // The raw upload is gone; the normalized photo is readable.
    assert!(app.storage.get(&key).await.is_err());
    let normalized = app.storage.get(&photo.r2_key).await?;
    assert!(!normalized.is_empty());

    Ok(())
}

#[tokio::test]
async fn redelivered_notification_is_idempotent() -> anyhow::Result<()> {
    let docker = Cli::default();
    let (harness, _db_container) = spawn_app(&docker).await?;
    let app = harness.app.clone();
    let db = app.database.clone();

    let (photographer_id, event_id) = seed_event(&db).await?;
    grant_credits(&db, photographer_id, 5, 30).await?;
    let (_, key) = seed_intent(&db, photographer_id, event_id, 1).await?;

    let original = common::png_bytes(64, 64);
    app.storage.put_jpeg(&key, original.clone()).await?;

    // The same notification delivered twice.
    for _ in 0..2 {
        db.enqueue_upload_event(
            "PutObject",
            "photos-test",
            &key,
            original.len() as i64,
            None,
            Utc::now(),
        )
        .await?;
    }

    tokio::spawn(tasks::process_uploads::process_uploads(app.clone()));

    eventually(Duration::from_secs(30), || {
        let db = db.clone();
        async move { Ok(db.count_upload_events().await? == 0) }
    })
    .await?;

    // One debit, one photo, one job - not two.
    assert_eq!(db.photographer_balance(photographer_id).await?, 4);
    assert_eq!(db.count_photo_jobs().await?, 1);

    Ok(())
}
