mod common;

use common::prelude::*;
use photo_pipeline::database::types::NewPhoto;

/// An expired, 31-day-old event with three live photos and a provider-side
/// collection.
async fn seed_expired_event(harness: &TestHarness) -> anyhow::Result<(Uuid, Vec<Uuid>)> {
    let db = &harness.app.database;

    let photographer_id = Uuid::new_v4();
    let event_id = Uuid::new_v4();
    db.insert_photographer(photographer_id).await?;
    db.insert_event(event_id, photographer_id, Utc::now() - chrono::Duration::hours(1))
        .await?;
    sqlx::query("UPDATE events SET created_at = CURRENT_TIMESTAMP - INTERVAL '31 days' WHERE id = $1")
        .bind(event_id)
        .execute(&db.pool)
        .await?;

    let collection_id = event_id.to_string();
    harness.provider.create_collection(&collection_id).await.unwrap();
    db.set_event_collection(event_id, &collection_id).await?;

    let mut photo_ids = Vec::new();
    for _ in 0..3 {
        let id = Uuid::new_v4();
        db.insert_photo(&NewPhoto {
            id,
            event_id,
            r2_key: storage::photo_key(event_id, id),
            width: 320,
            height: 200,
            file_size: 1024,
            original_mime_type: "image/jpeg".to_string(),
            original_file_size: 2048,
        })
        .await?;
        photo_ids.push(id);
    }

    Ok((event_id, photo_ids))
}

#[tokio::test]
async fn scan_enqueues_and_reconciler_tears_down() -> anyhow::Result<()> {
    let docker = Cli::default();
    let (harness, _db_container) = spawn_app(&docker).await?;
    let app = harness.app.clone();
    let db = app.database.clone();

    let (event_id, photo_ids) = seed_expired_event(&harness).await?;

    // The scanner finds the event; the reconciler tears it down.
    tokio::spawn(tasks::cleanup_events::scan_expired_events(app.clone()));
    tokio::spawn(tasks::cleanup_events::cleanup_events(app.clone()));

    eventually(Duration::from_secs(30), || {
        let db = db.clone();
        async move {
            let event = db.get_event(event_id).await?.unwrap();
            Ok(event.collection_id.is_none())
        }
    })
    .await?;

    // All photos soft-deleted, rows still present.
    for photo_id in &photo_ids {
        let photo = db.get_photo(*photo_id).await?.unwrap();
        assert!(photo.deleted_at.is_some());
    }
    assert!(!db.has_undeleted_photos(event_id).await?);

    // The provider collection was removed with a single call.
    assert_eq!(harness.provider.delete_calls(), 1);
    assert!(!harness.provider.has_collection(&event_id.to_string()));

    // The job is settled.
    eventually(Duration::from_secs(10), || {
        let db = db.clone();
        async move { Ok(db.count_cleanup_jobs().await? == 0) }
    })
    .await?;

    Ok(())
}

#[tokio::test]
async fn rerunning_cleanup_is_a_no_op() -> anyhow::Result<()> {
    let docker = Cli::default();
    let (harness, _db_container) = spawn_app(&docker).await?;
    let app = harness.app.clone();
    let db = app.database.clone();

    let (event_id, photo_ids) = seed_expired_event(&harness).await?;

    db.enqueue_cleanup_job(event_id).await?;
    tokio::spawn(tasks::cleanup_events::cleanup_events(app.clone()));

    eventually(Duration::from_secs(30), || {
        let db = db.clone();
        async move {
            let event = db.get_event(event_id).await?.unwrap();
            Ok(event.collection_id.is_none() && db.count_cleanup_jobs().await? == 0)
        }
    })
    .await?;

    let first_pass: Vec<_> = {
        let mut deleted = Vec::new();
        for photo_id in &photo_ids {
            deleted.push(db.get_photo(*photo_id).await?.unwrap().deleted_at);
        }
        deleted
    };

    // Run the same job again.
    db.enqueue_cleanup_job(event_id).await?;
    eventually(Duration::from_secs(30), || {
        let db = db.clone();
        async move { Ok(db.count_cleanup_jobs().await? == 0) }
    })
    .await?;

    // Identical state: timestamps unmoved, no extra provider call.
    for (photo_id, deleted_at) in photo_ids.iter().zip(first_pass) {
        let photo = db.get_photo(*photo_id).await?.unwrap();
        assert_eq!(photo.deleted_at, deleted_at);
    }
    assert_eq!(harness.provider.delete_calls(), 1);

    let event = db.get_event(event_id).await?.unwrap();
    assert!(event.collection_id.is_none());

    Ok(())
}
