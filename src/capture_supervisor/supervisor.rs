use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use log::{debug, error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::command::{record_args, sanitize_component, thumbnail_args, thumbnail_path_for, unique_output_path};
use super::thumbnail::capture_still;
use super::types::{ProcessEvent, SessionHandle, SupervisorStats};
use crate::configuration::types::CaptureConfig;
use crate::error_handling::types::{CaptureError, StorageError};
use crate::fleet_monitor::MonitorRegistry;
use crate::notification_hub::NotificationHub;
use crate::storage::types::{Device, Event, EventType, Session, Severity, TriggerReason};
use crate::storage::RecordStore;
use crate::storage_locator::StorageLocator;

/// Answers a stop request with the outcome of the termination signal.
type StopAck = oneshot::Sender<Result<(), String>>;

/// Sends the graceful termination request to a child.
type Terminator = fn(&Child) -> io::Result<()>;

struct LiveSession {
    session: Session,
    pid: Option<u32>,
    /// Taken by the first stop request; dropping it also ends the watcher.
    stop_tx: Option<oneshot::Sender<StopAck>>,
    watcher: Option<JoinHandle<()>>,
    stop_requested: bool,
}

#[derive(Default)]
struct LiveTable {
    sessions: HashMap<String, LiveSession>,
    /// Devices between the duplicate check and the spawn of their process.
    starting: HashSet<String>,
}

/// Supervises at most one capture process per device.
///
/// Each live session has a watcher task that owns the child process, drains
/// its stderr and reports its fate through [`CaptureSupervisor::handle_process_event`].
/// Finalization happens in whichever call removes the session from the live
/// table, so it runs exactly once per session.
pub struct CaptureSupervisor {
    config: CaptureConfig,
    locator: Arc<dyn StorageLocator>,
    store: Arc<dyn RecordStore>,
    hub: Arc<NotificationHub>,
    monitor_registry: Option<Arc<MonitorRegistry>>,
    live: Mutex<LiveTable>,
    terminate: Terminator,
    total_started: AtomicU64,
    failed_count: AtomicU64,
}

impl CaptureSupervisor {
    pub fn new(
        config: CaptureConfig,
        locator: Arc<dyn StorageLocator>,
        store: Arc<dyn RecordStore>,
        hub: Arc<NotificationHub>,
    ) -> Self {
        Self {
            config,
            locator,
            store,
            hub,
            monitor_registry: None,
            live: Mutex::new(LiveTable::default()),
            terminate: request_termination,
            total_started: AtomicU64::new(0),
            failed_count: AtomicU64::new(0),
        }
    }

    /// Mirrors recording flag changes into the fleet monitor's entries.
    pub fn with_monitor_registry(mut self, registry: Arc<MonitorRegistry>) -> Self {
        self.monitor_registry = Some(registry);
        self
    }

    #[cfg(test)]
    pub(super) fn with_terminator(mut self, terminate: Terminator) -> Self {
        self.terminate = terminate;
        self
    }

    fn table(&self) -> MutexGuard<'_, LiveTable> {
        self.live.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Starts a manually triggered recording.
    pub async fn start_recording(
        self: &Arc<Self>,
        device: &Device,
    ) -> Result<SessionHandle, CaptureError> {
        self.start_recording_with_trigger(device, TriggerReason::Manual)
            .await
    }

    pub async fn start_recording_with_trigger(
        self: &Arc<Self>,
        device: &Device,
        trigger: TriggerReason,
    ) -> Result<SessionHandle, CaptureError> {
        {
            let mut table = self.table();
            if table.sessions.contains_key(&device.id) || table.starting.contains(&device.id) {
                return Err(CaptureError::AlreadyRecording);
            }
            table.starting.insert(device.id.clone());
        }

        let launched = self.launch(device).await;
        let (child, output_path) = match launched {
            Ok(launched) => launched,
            Err(e) => {
                self.table().starting.remove(&device.id);
                self.failed_count.fetch_add(1, Ordering::Relaxed);
                error!("[{}] Failed to start recording: {}", device.id, e);
                return Err(e);
            }
        };
        let pid = child.id();

        let thumbnail_path = thumbnail_path_for(&output_path);
        let session = Session {
            id: Uuid::new_v4(),
            device_id: device.id.clone(),
            device_name: device.name.clone(),
            start_time: Utc::now(),
            end_time: None,
            duration_secs: None,
            output_path: output_path.clone(),
            thumbnail_path: None,
            trigger,
            file_size: None,
        };
        let session_id = session.id;
        let start_time = session.start_time;

        // The session is stoppable from here on. Its exit is only handled
        // once the start has been persisted and announced, so finalization
        // always lands after it.
        let (ready_tx, ready_rx) = oneshot::channel::<()>();
        {
            let mut table = self.table();
            table.starting.remove(&device.id);
            let (stop_tx, stop_rx) = oneshot::channel();
            let supervisor = Arc::clone(self);
            let device_id = device.id.clone();
            let grace = Duration::from_secs(self.config.stop_grace_secs);
            let terminate = self.terminate;
            let watcher = tokio::spawn(async move {
                let outcome = watch_process(child, stop_rx, grace, session_id, terminate).await;
                let _ = ready_rx.await;
                supervisor
                    .handle_process_event(&device_id, session_id, outcome)
                    .await;
            });
            table.sessions.insert(
                device.id.clone(),
                LiveSession {
                    session: session.clone(),
                    pid: None,
                    stop_tx: Some(stop_tx),
                    watcher: Some(watcher),
                    stop_requested: false,
                },
            );
        }
        if let Some(pid) = pid {
            self.handle_process_event(&device.id, session_id, ProcessEvent::Spawned { pid })
                .await;
        }
        info!(
            "[{}] Recording {} started -> {}",
            session_id,
            device.id,
            output_path.display()
        );

        if let Err(e) = self.store.insert_session(&session).await {
            error!("[{}] Failed to persist session: {}", session_id, e);
        }
        if let Err(e) = self
            .store
            .set_recording_flag(&device.id, true, start_time)
            .await
        {
            error!("[{}] Failed to persist recording flag: {}", device.id, e);
        }
        if let Some(registry) = &self.monitor_registry {
            registry.set_recording(&device.id, true).await;
        }
        self.emit(
            EventType::RecordingStarted,
            Severity::Info,
            &device.id,
            format!("Recording started for {}", device.name),
        )
        .await;
        self.hub
            .broadcast_recording(&device.id, true, Some(session_id))
            .await;
        let _ = ready_tx.send(());
        self.total_started.fetch_add(1, Ordering::Relaxed);

        self.schedule_thumbnail(device, session_id, thumbnail_path.clone());

        Ok(SessionHandle {
            session_id,
            device_id: device.id.clone(),
            output_path,
            thumbnail_path,
        })
    }

    /// Resolves the output path and spawns the capture process.
    async fn launch(&self, device: &Device) -> Result<(Child, PathBuf), CaptureError> {
        let dir = self
            .locator
            .current_storage_root()
            .join(sanitize_component(&device.id));
        tokio::fs::create_dir_all(&dir).await?;

        let output_path = unique_output_path(&dir, &device.name, Utc::now(), &self.config.container);
        let args = record_args(&self.config, device, &output_path);
        debug!("[{}] {} {:?}", device.id, self.config.program, args);

        let child = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CaptureError::SpawnFailed(format!("{}: {}", self.config.program, e)))?;
        Ok((child, output_path))
    }

    fn schedule_thumbnail(self: &Arc<Self>, device: &Device, session_id: Uuid, path: PathBuf) {
        let supervisor = Arc::clone(self);
        let args = thumbnail_args(device, &path);
        let device_id = device.id.clone();
        let delay = Duration::from_secs(self.config.thumbnail_delay_secs);
        let limit = Duration::from_secs(self.config.thumbnail_timeout_secs);

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if supervisor.live_session_id(&device_id) != Some(session_id) {
                debug!("[{}] Session ended before thumbnail capture", session_id);
                return;
            }
            if let Err(e) = capture_still(&supervisor.config.program, &args, &path, limit).await {
                warn!("[{}] Thumbnail capture failed: {}", session_id, e);
                return;
            }
            info!("[{}] Thumbnail saved to {}", session_id, path.display());
            if let Err(e) = supervisor.store.set_session_thumbnail(session_id, &path).await {
                error!("[{}] Failed to persist thumbnail path: {}", session_id, e);
            }
        });
    }

    /// Requests graceful termination and waits until the session is finalized.
    ///
    /// The session is finalized even when the termination signal cannot be
    /// delivered (the process is killed after the grace period), but that
    /// failure is still returned as a `ProcessError`.
    pub async fn stop_recording(&self, device_id: &str) -> Result<(), CaptureError> {
        let (stop_tx, watcher, session_id, pid) = {
            let mut table = self.table();
            let live = match table.sessions.get_mut(device_id) {
                Some(live) if !live.stop_requested => live,
                _ => return Err(CaptureError::NotRecording),
            };
            live.stop_requested = true;
            (live.stop_tx.take(), live.watcher.take(), live.session.id, live.pid)
        };
        info!(
            "[{}] Stop requested for {} (pid {:?})",
            session_id, device_id, pid
        );

        let (ack_tx, ack_rx) = oneshot::channel();
        if let Some(tx) = stop_tx {
            if tx.send(ack_tx).is_err() {
                debug!("[{}] Capture process already exited", session_id);
            }
        }
        if let Some(watcher) = watcher {
            if let Err(e) = watcher.await {
                error!("[{}] Watcher task failed: {}", session_id, e);
                return Err(CaptureError::ProcessError(e.to_string()));
            }
        }
        match ack_rx.await {
            Ok(Err(reason)) => Err(CaptureError::ProcessError(format!(
                "termination request failed: {}",
                reason
            ))),
            // No answer means the process was already gone.
            _ => Ok(()),
        }
    }

    /// Entry point for process lifecycle notifications.
    ///
    /// Terminal events finalize the session if it is still live for the
    /// device; anything else is a no-op. Returns `true` when this call
    /// performed the finalization.
    pub async fn handle_process_event(
        &self,
        device_id: &str,
        session_id: Uuid,
        event: ProcessEvent,
    ) -> bool {
        if let ProcessEvent::Spawned { pid } = event {
            if let Some(live) = self.table().sessions.get_mut(device_id) {
                if live.session.id == session_id {
                    live.pid = Some(pid);
                }
            }
            debug!("[{}] Capture process running as pid {}", session_id, pid);
            return false;
        }

        let live = {
            let mut table = self.table();
            let current = table
                .sessions
                .get(device_id)
                .is_some_and(|live| live.session.id == session_id);
            if current {
                table.sessions.remove(device_id)
            } else {
                None
            }
        };
        let Some(live) = live else {
            debug!("[{}] {:?} for a session that is no longer live", session_id, event);
            return false;
        };

        let failure = match (&event, live.stop_requested) {
            (_, true) => None,
            (ProcessEvent::Exited(Some(0)), false) => None,
            (ProcessEvent::Exited(Some(code)), false) => {
                Some(format!("capture process exited with code {}", code))
            }
            (ProcessEvent::Exited(None), false) => {
                Some("capture process was terminated by a signal".to_string())
            }
            (ProcessEvent::Failed(reason), false) => Some(reason.clone()),
            (ProcessEvent::Spawned { .. }, false) => None,
        };
        self.finalize(live.session, failure).await;
        true
    }

    async fn finalize(&self, mut session: Session, failure: Option<String>) {
        let end = Utc::now();
        let duration = (end - session.start_time).num_seconds().max(0);
        let file_size = output_size(&session.output_path).await;
        session.end_time = Some(end);
        session.duration_secs = Some(duration);
        session.file_size = Some(file_size);

        if let Err(e) = self
            .store
            .update_session_on_finalize(session.id, end, duration, file_size)
            .await
        {
            error!("[{}] Failed to persist finalized session: {}", session.id, e);
        }
        if let Err(e) = self
            .store
            .set_recording_flag(&session.device_id, false, end)
            .await
        {
            error!("[{}] Failed to clear recording flag: {}", session.device_id, e);
        }
        if let Some(registry) = &self.monitor_registry {
            registry.set_recording(&session.device_id, false).await;
        }

        if let Some(reason) = failure {
            self.failed_count.fetch_add(1, Ordering::Relaxed);
            warn!("[{}] Recording failed: {}", session.id, reason);
            self.emit(
                EventType::RecordingError,
                Severity::Error,
                &session.device_id,
                format!("Recording error on {}: {}", session.device_name, reason),
            )
            .await;
        }

        info!(
            "[{}] Recording finalized: {}s, {} bytes",
            session.id, duration, file_size
        );
        self.emit(
            EventType::RecordingStopped,
            Severity::Info,
            &session.device_id,
            format!(
                "Recording stopped for {} after {}s",
                session.device_name, duration
            ),
        )
        .await;
        self.hub
            .broadcast_recording(&session.device_id, false, Some(session.id))
            .await;
    }

    async fn emit(&self, event_type: EventType, severity: Severity, device_id: &str, message: String) {
        let event = Event::new(event_type, severity, Some(device_id), message);
        if let Err(e) = self.store.insert_event(&event).await {
            error!("[{}] Failed to store event: {}", device_id, e);
        }
        self.hub.broadcast_event(&event).await;
    }

    pub fn is_recording(&self, device_id: &str) -> bool {
        self.table().sessions.contains_key(device_id)
    }

    /// Id of the live session for a device, if any.
    pub fn live_session_id(&self, device_id: &str) -> Option<Uuid> {
        self.table().sessions.get(device_id).map(|l| l.session.id)
    }

    /// Device ids with a live session, sorted.
    pub fn recording_devices(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.table().sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Stops every live session concurrently and waits for all of them.
    ///
    /// Returns the number of sessions this call stopped.
    pub async fn stop_all(&self) -> usize {
        let ids = self.recording_devices();
        if ids.is_empty() {
            return 0;
        }
        info!("Stopping {} active recordings", ids.len());

        let results = join_all(ids.iter().map(|id| self.stop_recording(id))).await;
        let stopped = results.iter().filter(|r| r.is_ok()).count();
        for (id, result) in ids.iter().zip(results) {
            if let Err(e) = result {
                warn!("[{}] Stop during shutdown reported: {}", id, e);
            }
        }
        stopped
    }

    /// Closes sessions and clears recording flags left open by a previous
    /// run that ended without finalizing them.
    ///
    /// Sessions live in this process are left alone. The end time of a
    /// closed session is the last write to its output file when known.
    /// Returns the number of sessions closed.
    pub async fn recover_interrupted(&self) -> Result<usize, StorageError> {
        let now = Utc::now();
        let mut closed = 0;
        for session in self.store.list_sessions().await? {
            if !session.is_live() || self.live_session_id(&session.device_id) == Some(session.id) {
                continue;
            }
            let end = match tokio::fs::metadata(&session.output_path).await {
                Ok(meta) => meta
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or(now)
                    .min(now)
                    .max(session.start_time),
                Err(_) => now,
            };
            let duration = (end - session.start_time).num_seconds().max(0);
            let file_size = output_size(&session.output_path).await;
            match self
                .store
                .update_session_on_finalize(session.id, end, duration, file_size)
                .await
            {
                Ok(()) => {
                    warn!(
                        "[{}] Closed interrupted recording of {} ({}s, {} bytes)",
                        session.id, session.device_id, duration, file_size
                    );
                    closed += 1;
                }
                Err(e) => error!("[{}] Failed to close interrupted session: {}", session.id, e),
            }
        }

        for device in self.store.list_devices().await? {
            if !device.recording || self.is_recording(&device.id) {
                continue;
            }
            if let Err(e) = self.store.set_recording_flag(&device.id, false, now).await {
                error!("[{}] Failed to clear stale recording flag: {}", device.id, e);
            } else {
                info!("[{}] Cleared stale recording flag", device.id);
            }
            if let Some(registry) = &self.monitor_registry {
                registry.set_recording(&device.id, false).await;
            }
        }
        Ok(closed)
    }

    pub fn stats(&self) -> SupervisorStats {
        SupervisorStats {
            active_count: self.table().sessions.len(),
            total_started: self.total_started.load(Ordering::Relaxed),
            failed_count: self.failed_count.load(Ordering::Relaxed),
        }
    }
}

/// Owns the child until it is gone and reports how it ended.
///
/// A stop request (or the supervisor dropping the sender) triggers
/// `terminate`, then a hard kill once `grace` has elapsed. The requester is
/// told whether the termination signal went out.
async fn watch_process(
    mut child: Child,
    stop_rx: oneshot::Receiver<StopAck>,
    grace: Duration,
    session_id: Uuid,
    terminate: Terminator,
) -> ProcessEvent {
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("[{}] {}", session_id, line);
            }
        });
    }

    let ack = tokio::select! {
        status = child.wait() => return exit_event(status),
        request = stop_rx => request.ok(),
    };

    let signalled = terminate(&child).map_err(|e| {
        warn!("[{}] SIGTERM failed: {}", session_id, e);
        e.to_string()
    });
    if let Some(ack) = ack {
        let _ = ack.send(signalled);
    }
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => exit_event(status),
        Err(_) => {
            warn!(
                "[{}] Capture process ignored SIGTERM for {:?}, killing",
                session_id, grace
            );
            if let Err(e) = child.start_kill() {
                error!("[{}] Kill failed: {}", session_id, e);
            }
            exit_event(child.wait().await)
        }
    }
}

async fn output_size(path: &Path) -> u64 {
    tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}

fn exit_event(status: io::Result<ExitStatus>) -> ProcessEvent {
    match status {
        Ok(status) => ProcessEvent::Exited(status.code()),
        Err(e) => ProcessEvent::Failed(e.to_string()),
    }
}

#[cfg(unix)]
fn request_termination(child: &Child) -> io::Result<()> {
    let Some(pid) = child.id() else {
        return Ok(());
    };
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    // SAFETY: kill(2) takes no pointers; the pid is our own unreaped child.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn request_termination(child: &Child) -> io::Result<()> {
    let _ = child;
    Ok(())
}
