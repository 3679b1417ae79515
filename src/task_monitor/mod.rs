use std::sync::Arc;
use std::time::Duration;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use once_cell::sync::Lazy;
use prometheus::{exponential_buckets, register_gauge, register_histogram, Gauge, Histogram};
use tokio::select;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::app::App;
use crate::database::methods::DbMethods as _;
use crate::database::Database;
use crate::shutdown::Shutdown;

pub mod tasks;

const PROCESS_UPLOADS_BACKOFF: Duration = Duration::from_secs(5);
const INDEX_FACES_BACKOFF: Duration = Duration::from_secs(5);
const CLEANUP_SCAN_BACKOFF: Duration = Duration::from_secs(5);
const CLEANUP_EVENTS_BACKOFF: Duration = Duration::from_secs(5);
const QUEUE_MONITOR_BACKOFF: Duration = Duration::from_secs(5);

static UPLOAD_EVENTS_QUEUED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "upload_events_queued",
        "Object-create notifications awaiting the upload processor"
    )
    .unwrap()
});

static PHOTO_JOBS_QUEUED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("photo_jobs_queued", "Photos awaiting face indexing").unwrap()
});

static CLEANUP_JOBS_QUEUED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("cleanup_jobs_queued", "Events awaiting cleanup").unwrap()
});

static INDEX_BATCH_SIZES: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "index_batch_sizes",
        "Face-indexing batch size",
        exponential_buckets(1.0, 2.0, 8).unwrap()
    )
    .unwrap()
});

/// A task manager for all long running tasks
///
/// It's assumed that there is only one instance at a time.
/// Spawning multiple `TaskMonitor`s will result in undefined behavior,
/// including data duplication.
pub struct TaskMonitor;

impl TaskMonitor {
    /// Initialize and run the task monitor
    #[instrument(level = "debug", skip_all)]
    pub async fn init(main_app: Arc<App>, shutdown: Shutdown) {
        let handles = FuturesUnordered::new();

        // Process uploads
        let app = main_app.clone();
        let process_uploads_handle = crate::utils::spawn_restarting(
            "process_uploads",
            PROCESS_UPLOADS_BACKOFF,
            shutdown.clone(),
            move || tasks::process_uploads::process_uploads(app.clone()),
        );
        handles.push(process_uploads_handle);

        // Index faces
        let app = main_app.clone();
        let index_faces_handle = crate::utils::spawn_restarting(
            "index_faces",
            INDEX_FACES_BACKOFF,
            shutdown.clone(),
            move || tasks::index_faces::index_faces(app.clone()),
        );
        handles.push(index_faces_handle);

        // Scan for expired events
        let app = main_app.clone();
        let scan_expired_events_handle = crate::utils::spawn_restarting(
            "scan_expired_events",
            CLEANUP_SCAN_BACKOFF,
            shutdown.clone(),
            move || tasks::cleanup_events::scan_expired_events(app.clone()),
        );
        handles.push(scan_expired_events_handle);

        // Clean up expired events
        let app = main_app.clone();
        let cleanup_events_handle = crate::utils::spawn_restarting(
            "cleanup_events",
            CLEANUP_EVENTS_BACKOFF,
            shutdown.clone(),
            move || tasks::cleanup_events::cleanup_events(app.clone()),
        );
        handles.push(cleanup_events_handle);

        // Report queue depths
        let app = main_app.clone();
        let queue_monitor_handle = crate::utils::spawn_restarting(
            "monitor_queues",
            QUEUE_MONITOR_BACKOFF,
            shutdown.clone(),
            move || tasks::monitor_queues::monitor_queues(app.clone()),
        );
        handles.push(queue_monitor_handle);

        tokio::spawn(Self::monitor_shutdown(handles, shutdown.clone()));
    }

    async fn monitor_shutdown(mut handles: FuturesUnordered<JoinHandle<()>>, shutdown: Shutdown) {
        select! {
            // Wait for the shutdown signal
            _ = shutdown.await_shutdown_begin() => {
             }
            // Or wait for a task to panic
            _ = Self::await_task_panic(&mut handles, shutdown.clone()) => {}
        };
    }

    async fn await_task_panic(handles: &mut FuturesUnordered<JoinHandle<()>>, shutdown: Shutdown) {
        while let Some(result) = handles.next().await {
            if !shutdown.is_shutting_down() {
                match result {
                    Ok(_) => {
                        info!("task exited");
                    }
                    Err(error) => {
                        error!(?error, "task panicked");
                        // Instruct the rest of the app to shutdown
                        shutdown.shutdown();
                        return;
                    }
                }
            }
        }
        warn!("all tasks have returned unexpectedly");
    }

    pub(crate) async fn log_queue_depths(database: &Database) -> anyhow::Result<()> {
        UPLOAD_EVENTS_QUEUED.set(database.count_upload_events().await? as f64);
        PHOTO_JOBS_QUEUED.set(database.count_photo_jobs().await? as f64);
        CLEANUP_JOBS_QUEUED.set(database.count_cleanup_jobs().await? as f64);
        Ok(())
    }

    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn log_batch_size(size: usize) {
        INDEX_BATCH_SIZES.observe(size as f64);
    }
}
