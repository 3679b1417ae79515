mod common;

use common::prelude::*;

#[tokio::test]
async fn insufficient_credits_keeps_the_object() -> anyhow::Result<()> {
    let docker = Cli::default();
    let (harness, _db_container) = spawn_app(&docker).await?;
    let app = harness.app.clone();
    let db = app.database.clone();

    // An event with a pending intent but an empty ledger.
    let (photographer_id, event_id) = seed_event(&db).await?;
    let (_, key) = seed_intent(&db, photographer_id, event_id, 1).await?;

    let original = common::png_bytes(64, 64);
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
            Ok(intent.status == IntentStatus::Failed)
        }
    })
    .await?;

    let intent = db.get_intent_by_key(&key).await?.unwrap();
    assert_eq!(intent.error_code.as_deref(), Some("insufficient_credits"));
    assert_eq!(intent.retryable, Some(true));
    assert!(intent.photo_id.is_none());

    // No photo row, ledger untouched, message settled.
    assert_eq!(db.photographer_balance(photographer_id).await?, 0);
    assert_eq!(db.count_photo_jobs().await?, 0);
    assert_eq!(db.count_upload_events().await?, 0);

    // The object is retained so a top-up can be followed by a re-upload.
    assert_eq!(app.storage.get(&key).await?, original);

    Ok(())
}

#[tokio::test]
async fn invalid_magic_bytes_deletes_the_object() -> anyhow::Result<()> {
    let docker = Cli::default();
    let (harness, _db_container) = spawn_app(&docker).await?;
    let app = harness.app.clone();
    let db = app.database.clone();

    let (photographer_id, event_id) = seed_event(&db).await?;
    grant_credits(&db, photographer_id, 5, 30).await?;
    let (_, key) = seed_intent(&db, photographer_id, event_id, 1).await?;

    // Sixteen zero bytes are not any accepted image format.
    let garbage = Bytes::from_static(&[0u8; 16]);
    app.storage.put_jpeg(&key, garbage.clone()).await?;
    db.enqueue_upload_event("PutObject", "photos-test", &key, 16, None, Utc::now())
        .await?;

    tokio::spawn(tasks::process_uploads::process_uploads(app.clone()));

    eventually(Duration::from_secs(30), || {
        let db = db.clone();
        let key = key.clone();
        async move {
            let intent = db.get_intent_by_key(&key).await?.unwrap();
            Ok(intent.status == IntentStatus::Failed)
        }
    })
    .await?;

    let intent = db.get_intent_by_key(&key).await?.unwrap();
    assert_eq!(intent.error_code.as_deref(), Some("invalid_magic_bytes"));
    assert_eq!(intent.retryable, Some(false));

    // Ledger untouched, object dropped.
    assert_eq!(db.photographer_balance(photographer_id).await?, 5);
    assert!(app.storage.get(&key).await.is_err());
    assert_eq!(db.count_upload_events().await?, 0);

    Ok(())
}

#[tokio::test]
async fn oversized_object_is_rejected_before_download() -> anyhow::Result<()> {
    let docker = Cli::default();
    let (harness, _db_container) = spawn_app(&docker).await?;
    let app = harness.app.clone();
    let db = app.database.clone();

    let (photographer_id, event_id) = seed_event(&db).await?;
    grant_credits(&db, photographer_id, 5, 30).await?;
    let (_, key) = seed_intent(&db, photographer_id, event_id, 1).await?;

    // One byte over the 20 MiB ceiling.
    let oversized = Bytes::from(vec![0u8; 20 * 1024 * 1024 + 1]);
    app.storage.put_jpeg(&key, oversized).await?;
    db.enqueue_upload_event("PutObject", "photos-test", &key, 0, None, Utc::now())
        .await?;

    tokio::spawn(tasks::process_uploads::process_uploads(app.clone()));

    eventually(Duration::from_secs(30), || {
        let db = db.clone();
        let key = key.clone();
        async move {
            let intent = db.get_intent_by_key(&key).await?.unwrap();
            Ok(intent.status == IntentStatus::Failed)
        }
    })
    .await?;

    let intent = db.get_intent_by_key(&key).await?.unwrap();
    assert_eq!(intent.error_code.as_deref(), Some("size_exceeded"));
    assert!(app.storage.get(&key).await.is_err());

    Ok(())
}

#[tokio::test]
async fn expired_intent_is_marked_and_object_dropped() -> anyhow::Result<()> {
    let docker = Cli::default();
    let (harness, _db_container) = spawn_app(&docker).await?;
    let app = harness.app.clone();
    let db = app.database.clone();

    let (photographer_id, event_id) = seed_event(&db).await?;
    grant_credits(&db, photographer_id, 5, 30).await?;
    // The reservation lapsed an hour before the object arrived.
    let (_, key) = seed_intent(&db, photographer_id, event_id, -1).await?;

    let original = common::png_bytes(64, 64);
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
            Ok(intent.status == IntentStatus::Expired)
        }
    })
    .await?;

    assert!(app.storage.get(&key).await.is_err());
    assert_eq!(db.photographer_balance(photographer_id).await?, 5);
    assert_eq!(db.count_upload_events().await?, 0);

    Ok(())
}

#[tokio::test]
async fn orphan_objects_and_foreign_actions_are_settled() -> anyhow::Result<()> {
    let docker = Cli::default();
    let (harness, _db_container) = spawn_app(&docker).await?;
    let app = harness.app.clone();
    let db = app.database.clone();

    // An object nobody reserved.
    let orphan_key = "uploads/nobody-asked-for-this";
    app.storage
        .put_jpeg(orphan_key, common::png_bytes(8, 8))
        .await?;
    db.enqueue_upload_event("PutObject", "photos-test", orphan_key, 100, None, Utc::now())
        .await?;

    // Notifications outside the pipeline's purview.
    db.enqueue_upload_event("DeleteObject", "photos-test", "uploads/x", 0, None, Utc::now())
        .await?;
    db.enqueue_upload_event("PutObject", "photos-test", "logos/brand.png", 0, None, Utc::now())
        .await?;

    tokio::spawn(tasks::process_uploads::process_uploads(app.clone()));

    eventually(Duration::from_secs(30), || {
        let db = db.clone();
        async move { Ok(db.count_upload_events().await? == 0) }
    })
    .await?;

    // The orphan object was dropped; nothing else happened.
    assert!(app.storage.get(orphan_key).await.is_err());
    assert_eq!(db.count_photo_jobs().await?, 0);

    Ok(())
}
