use std::path::PathBuf;

use serde::Serialize;
use uuid::Uuid;

/// What happened to a capture process.
///
/// `Spawned` is reported once right after launch; exactly one of `Exited` or
/// `Failed` follows when the process is gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Spawned { pid: u32 },
    /// Exit code, or `None` when the process was ended by a signal.
    Exited(Option<i32>),
    /// Waiting on the process itself failed.
    Failed(String),
}

/// Returned by a successful start.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionHandle {
    pub session_id: Uuid,
    pub device_id: String,
    pub output_path: PathBuf,
    /// Where the still image will be written; stored on the session only
    /// once the capture succeeds.
    pub thumbnail_path: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SupervisorStats {
    pub active_count: usize,
    pub total_started: u64,
    /// Spawn failures plus sessions that ended with a process error.
    pub failed_count: u64,
}
