//! Running recording session.
//!
//! A session owns the transcoder child, the loopback plain transports and
//! paused consumers feeding it, and the stream-description file. The session
//! task is the only place those are released, on every exit path.

use crate::media::engine::{Consumer, PlainTransport, Transport};
use crate::observability::metrics;
use crate::repositories::{MeetingParticipant, MeetingRepository};
use crate::services::{BlobStore, EventParticipant, EventPublisher, RecordingCompletedEvent};
use common::types::MediaKind;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Time the transcoder gets to finalize after SIGINT before it is killed.
pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Lifecycle of a recording session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingState {
    /// Transcoder spawned, consumers still paused.
    Starting,
    /// Consumers resumed; media is flowing.
    Active,
    /// Stop requested; waiting for the transcoder to finalize.
    Stopping,
    /// Transcoder exited and resources are released.
    Completed { video_path: Option<PathBuf> },
}

/// Handle to a running session.
#[derive(Clone)]
pub struct RecordingHandle {
    session_id: String,
    room_id: String,
    meeting_id: String,
    output_path: PathBuf,
    stop: CancellationToken,
    state: watch::Receiver<RecordingState>,
}

impl RecordingHandle {
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    #[must_use]
    pub fn meeting_id(&self) -> &str {
        &self.meeting_id
    }

    #[must_use]
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Ask the transcoder to finalize. Idempotent.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    #[must_use]
    pub fn is_stop_requested(&self) -> bool {
        self.stop.is_cancelled()
    }

    #[must_use]
    pub fn state(&self) -> RecordingState {
        self.state.borrow().clone()
    }

    /// True once the session has released its resources.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(*self.state.borrow(), RecordingState::Completed { .. })
    }

    /// Wait for the session to finish. Returns the output path when a
    /// non-empty file was produced.
    pub async fn wait_completed(&self) -> Option<PathBuf> {
        let mut state = self.state.clone();
        loop {
            let done = match &*state.borrow_and_update() {
                RecordingState::Completed { video_path } => Some(video_path.clone()),
                _ => None,
            };
            if let Some(video_path) = done {
                return video_path;
            }
            if state.changed().await.is_err() {
                return None;
            }
        }
    }
}

/// Wait up to `timeout` for every session to finish. Returns how many were
/// still running when the time ran out.
pub async fn wait_all_completed(handles: Vec<RecordingHandle>, timeout: Duration) -> usize {
    let mut waiting = JoinSet::new();
    for handle in handles {
        waiting.spawn(async move {
            let video_path = handle.wait_completed().await;
            (handle, video_path)
        });
    }

    let drained = tokio::time::timeout(timeout, async {
        while let Some(joined) = waiting.join_next().await {
            if let Ok((handle, video_path)) = joined {
                info!(
                    target: "sfu.recording.session",
                    session_id = %handle.session_id(),
                    room_id = %handle.room_id(),
                    has_output = video_path.is_some(),
                    "Recording finalized"
                );
            }
        }
    })
    .await;

    if drained.is_ok() {
        0
    } else {
        warn!(
            target: "sfu.recording.session",
            remaining = waiting.len(),
            timeout_secs = timeout.as_secs(),
            "Recordings still running after timeout"
        );
        waiting.len()
    }
}

/// Engine handles and files a session must release.
#[derive(Default)]
pub(crate) struct SessionResources {
    pub(crate) consumers: Vec<Arc<dyn Consumer>>,
    pub(crate) transports: Vec<Arc<dyn PlainTransport>>,
    pub(crate) sdp_path: Option<PathBuf>,
}

impl SessionResources {
    async fn resume_consumers(&self) {
        for consumer in &self.consumers {
            if let Err(e) = consumer.resume().await {
                warn!(
                    target: "sfu.recording.session",
                    consumer_id = %consumer.id(),
                    error = %e,
                    "Failed to resume recording consumer"
                );
            }
        }
    }

    async fn request_key_frames(&self) {
        for consumer in self.consumers.iter().filter(|c| c.kind() == MediaKind::Video) {
            if let Err(e) = consumer.request_key_frame().await {
                debug!(
                    target: "sfu.recording.session",
                    consumer_id = %consumer.id(),
                    error = %e,
                    "Keyframe request failed"
                );
            }
        }
    }

    /// Close consumers and transports and remove the description file.
    pub(crate) async fn cleanup(&mut self) {
        for consumer in self.consumers.drain(..) {
            consumer.close();
        }
        for transport in self.transports.drain(..) {
            transport.close();
        }
        if let Some(path) = self.sdp_path.take() {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                debug!(
                    target: "sfu.recording.session",
                    path = %path.display(),
                    error = %e,
                    "Failed to remove stream description"
                );
            }
        }
    }
}

/// Collaborators and settings the session needs after the transcoder exits.
pub(crate) struct SessionContext {
    pub(crate) session_id: String,
    pub(crate) room_id: String,
    pub(crate) meeting_id: String,
    pub(crate) output_path: PathBuf,
    pub(crate) participants: Vec<MeetingParticipant>,
    pub(crate) settle_delay: Duration,
    pub(crate) keyframe_interval: Duration,
    pub(crate) meetings: Arc<dyn MeetingRepository>,
    pub(crate) blob_store: Arc<dyn BlobStore>,
    pub(crate) publisher: Arc<dyn EventPublisher>,
}

/// Start supervising `child` and return a handle to the session.
pub(crate) fn spawn_session(
    child: Child,
    resources: SessionResources,
    ctx: SessionContext,
) -> RecordingHandle {
    let (state_tx, state_rx) = watch::channel(RecordingState::Starting);
    let stop = CancellationToken::new();
    let handle = RecordingHandle {
        session_id: ctx.session_id.clone(),
        room_id: ctx.room_id.clone(),
        meeting_id: ctx.meeting_id.clone(),
        output_path: ctx.output_path.clone(),
        stop: stop.clone(),
        state: state_rx,
    };
    tokio::spawn(run_session(child, resources, ctx, stop, state_tx));
    handle
}

#[instrument(
    skip_all,
    name = "sfu.recording.session",
    fields(room_id = %ctx.room_id, session_id = %ctx.session_id)
)]
async fn run_session(
    mut child: Child,
    mut resources: SessionResources,
    ctx: SessionContext,
    stop: CancellationToken,
    state: watch::Sender<RecordingState>,
) {
    let started = Instant::now();
    info!(
        target: "sfu.recording.session",
        pid = child.id(),
        output = %ctx.output_path.display(),
        "Recording session started"
    );

    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "sfu.recording.transcoder", "{line}");
            }
        });
    }

    let settle = tokio::time::sleep(ctx.settle_delay);
    tokio::pin!(settle);
    let interval = ctx.keyframe_interval.max(Duration::from_millis(1));
    let mut keyframes =
        tokio::time::interval_at(Instant::now() + ctx.settle_delay + interval, interval);
    let grace = tokio::time::sleep(STOP_GRACE_PERIOD);
    tokio::pin!(grace);

    let mut resumed = false;
    let mut signalled = false;
    let mut killed = false;

    let exit = loop {
        tokio::select! {
            status = child.wait() => break status,
            () = &mut settle, if !resumed => {
                resumed = true;
                resources.resume_consumers().await;
                resources.request_key_frames().await;
                if !signalled {
                    state.send_replace(RecordingState::Active);
                }
                debug!(target: "sfu.recording.session", "Recording consumers resumed");
            }
            _ = keyframes.tick(), if resumed && !signalled => {
                resources.request_key_frames().await;
            }
            () = stop.cancelled(), if !signalled => {
                signalled = true;
                state.send_replace(RecordingState::Stopping);
                info!(target: "sfu.recording.session", "Stopping transcoder");
                interrupt(&mut child);
                grace.as_mut().reset(Instant::now() + STOP_GRACE_PERIOD);
            }
            () = &mut grace, if signalled && !killed => {
                killed = true;
                warn!(
                    target: "sfu.recording.session",
                    grace_secs = STOP_GRACE_PERIOD.as_secs(),
                    "Transcoder did not exit after interrupt, killing"
                );
                if let Err(e) = child.start_kill() {
                    error!(target: "sfu.recording.session", error = %e, "Failed to kill transcoder");
                }
            }
        }
    };

    log_exit(&exit, stop.is_cancelled());
    resources.cleanup().await;

    let video_path = non_empty_output(&ctx.output_path).await;
    if let Err(e) = ctx
        .meetings
        .complete(&ctx.meeting_id, video_path.clone())
        .await
    {
        warn!(
            target: "sfu.recording.session",
            meeting_id = %ctx.meeting_id,
            error = %e,
            "Failed to complete meeting record"
        );
    }

    let status = if video_path.is_some() {
        "completed"
    } else {
        "failed"
    };
    metrics::record_recording(status, started.elapsed());

    if let Some(path) = &video_path {
        publish_output(&ctx, path).await;
    }

    info!(
        target: "sfu.recording.session",
        status,
        duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        "Recording session finished"
    );
    state.send_replace(RecordingState::Completed { video_path });
}

fn log_exit(exit: &std::io::Result<ExitStatus>, stop_requested: bool) {
    match exit {
        Ok(status) if status.success() => {
            info!(target: "sfu.recording.session", %status, "Transcoder exited");
        }
        Ok(status) if stop_requested => {
            info!(target: "sfu.recording.session", %status, "Transcoder exited after stop");
        }
        Ok(status) => {
            error!(target: "sfu.recording.session", %status, "Transcoder exited unexpectedly");
        }
        Err(e) => {
            error!(target: "sfu.recording.session", error = %e, "Failed to wait for transcoder");
        }
    }
}

#[cfg(unix)]
fn interrupt(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGINT) {
        warn!(
            target: "sfu.recording.session",
            pid,
            error = %e,
            "Failed to interrupt transcoder"
        );
    }
}

#[cfg(not(unix))]
fn interrupt(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        warn!(target: "sfu.recording.session", error = %e, "Failed to stop transcoder");
    }
}

async fn non_empty_output(path: &Path) -> Option<PathBuf> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Some(path.to_path_buf()),
        _ => None,
    }
}

async fn publish_output(ctx: &SessionContext, path: &Path) {
    let stored = match ctx.blob_store.upload(path, &ctx.room_id).await {
        Ok(stored) => stored,
        Err(e) => {
            warn!(
                target: "sfu.recording.session",
                path = %path.display(),
                error = %e,
                "Recording upload failed"
            );
            return;
        }
    };

    let event = RecordingCompletedEvent {
        meeting_id: ctx.meeting_id.clone(),
        room_id: ctx.room_id.clone(),
        video_url: stored.url,
        video_bucket: stored.bucket,
        video_key: stored.key,
        participants: ctx
            .participants
            .iter()
            .map(|p| EventParticipant {
                user_email: p.email.clone(),
                user_name: p.name.clone(),
            })
            .collect(),
    };
    if let Err(e) = ctx.publisher.publish_recording_completed(&event).await {
        warn!(
            target: "sfu.recording.session",
            meeting_id = %ctx.meeting_id,
            error = %e,
            "Failed to publish recording-completed event"
        );
    }
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tokio::process::Command;

    #[tokio::test]
    async fn test_interrupt_lets_the_process_exit_on_its_own() {
        let dir = tempfile::tempdir().unwrap();
        let ready = dir.path().join("ready");
        let script = format!(
            "trap 'exit 7' INT; touch '{}'; while :; do sleep 0.05; done",
            ready.display()
        );
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&script)
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        for _ in 0..200 {
            if ready.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(ready.exists(), "script never installed its trap");

        interrupt(&mut child);

        let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .unwrap()
            .unwrap();
        // The trap ran, so the process was interrupted rather than killed.
        assert_eq!(status.code(), Some(7));
    }
}
