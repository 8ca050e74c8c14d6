use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use log::debug;
use tokio::process::Command;
use tokio::time::timeout;

use crate::error_handling::types::CaptureError;

/// Runs one still-frame extraction and waits for it, bounded by `limit`.
///
/// The process is killed if it overruns. Success requires a zero exit status
/// and a non-empty output file.
pub async fn capture_still(
    program: &str,
    args: &[String],
    output: &Path,
    limit: Duration,
) -> Result<(), CaptureError> {
    let run = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status();

    let status = match timeout(limit, run).await {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => return Err(CaptureError::SpawnFailed(format!("{}: {}", program, e))),
        Err(_) => {
            return Err(CaptureError::ProcessError(format!(
                "still capture timed out after {:?}",
                limit
            )))
        }
    };
    if !status.success() {
        return Err(CaptureError::ProcessError(format!(
            "still capture exited with {}",
            status
        )));
    }

    let size = tokio::fs::metadata(output).await?.len();
    if size == 0 {
        return Err(CaptureError::ProcessError("still capture wrote an empty file".into()));
    }
    debug!("Wrote still frame {} ({} bytes)", output.display(), size);
    Ok(())
}
