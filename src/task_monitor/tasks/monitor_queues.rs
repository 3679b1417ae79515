use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use crate::app::App;
use crate::task_monitor::TaskMonitor;

const QUEUE_MONITOR_INTERVAL: Duration = Duration::from_secs(30);

/// Report the depth of each job queue.
pub async fn monitor_queues(app: Arc<App>) -> anyhow::Result<()> {
    loop {
        TaskMonitor::log_queue_depths(&app.database).await?;
        sleep(QUEUE_MONITOR_INTERVAL).await;
    }
}
