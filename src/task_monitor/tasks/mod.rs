pub mod cleanup_events;
pub mod index_faces;
pub mod monitor_queues;
pub mod process_uploads;
