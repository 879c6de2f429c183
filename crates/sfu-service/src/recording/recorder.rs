//! Composite recorder.
//!
//! Turns a room's participants into one transcoder process: a loopback plain
//! transport and paused consumer per stream, a stream-description file, and
//! the grid/mix filter graphs. Everything acquired before a failure is
//! released before the error is returned.

use super::ffmpeg::transcoder_args;
use super::layout::GridLayout;
use super::ports::allocate_ports;
use super::sdp::{build_sdp, SdpStream};
use super::session::{spawn_session, RecordingHandle, SessionContext, SessionResources};
use crate::config::Config;
use crate::errors::SfuError;
use crate::media::engine::{ConsumeOptions, Producer, Transport};
use crate::media::room::MediaRoom;
use crate::observability::metrics;
use crate::repositories::{MeetingParticipant, MeetingRepository};
use crate::services::{BlobStore, EventPublisher};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Loopback address the transcoder receives RTP on.
const LOOPBACK_IP: &str = "127.0.0.1";

/// Recorder knobs taken from service configuration.
#[derive(Debug, Clone)]
pub struct RecorderSettings {
    pub recordings_dir: PathBuf,
    pub transcoder_path: String,
    pub max_width: u32,
    pub max_height: u32,
    pub settle_delay: Duration,
    pub keyframe_interval: Duration,
}

impl RecorderSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            recordings_dir: config.recordings_dir.clone(),
            transcoder_path: config.transcoder_path.clone(),
            max_width: config.recording_max_width,
            max_height: config.recording_max_height,
            settle_delay: config.recording_settle_delay(),
            keyframe_interval: config.keyframe_interval(),
        }
    }
}

/// One room member offered for recording.
#[derive(Clone)]
pub struct RecordingParticipant {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub video: Option<Arc<dyn Producer>>,
    pub audio: Option<Arc<dyn Producer>>,
}

impl RecordingParticipant {
    /// Open video and audio producers, if the participant has both.
    fn recordable(&self) -> Option<(Arc<dyn Producer>, Arc<dyn Producer>)> {
        match (&self.video, &self.audio) {
            (Some(video), Some(audio)) if !video.is_closed() && !audio.is_closed() => {
                Some((Arc::clone(video), Arc::clone(audio)))
            }
            _ => None,
        }
    }
}

/// Input to [`CompositeRecorder::start`].
pub struct RecordingRequest {
    pub room_id: String,
    pub started_by: String,
    /// Candidates in display order.
    pub participants: Vec<RecordingParticipant>,
    /// Everyone in the room when the recording starts.
    pub meeting_participants: Vec<MeetingParticipant>,
}

/// Starts composite recording sessions.
pub struct CompositeRecorder {
    settings: RecorderSettings,
    meetings: Arc<dyn MeetingRepository>,
    blob_store: Arc<dyn BlobStore>,
    publisher: Arc<dyn EventPublisher>,
}

impl CompositeRecorder {
    #[must_use]
    pub fn new(
        settings: RecorderSettings,
        meetings: Arc<dyn MeetingRepository>,
        blob_store: Arc<dyn BlobStore>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            settings,
            meetings,
            blob_store,
            publisher,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &RecorderSettings {
        &self.settings
    }

    /// Launch a recording of every participant with open audio and video.
    ///
    /// # Errors
    ///
    /// `NoValidProducers` if nobody qualifies; engine, port, file and
    /// transcoder failures otherwise. On error the meeting record (if created)
    /// is completed without output.
    #[instrument(
        skip_all,
        name = "sfu.recording.start",
        fields(room_id = %request.room_id, started_by = %request.started_by)
    )]
    pub async fn start(
        &self,
        room: &MediaRoom,
        request: RecordingRequest,
    ) -> Result<RecordingHandle, SfuError> {
        let streams: Vec<(Arc<dyn Producer>, Arc<dyn Producer>)> = request
            .participants
            .iter()
            .filter_map(RecordingParticipant::recordable)
            .collect();
        if streams.is_empty() {
            return Err(SfuError::NoValidProducers);
        }

        tokio::fs::create_dir_all(&self.settings.recordings_dir)
            .await
            .map_err(|e| {
                SfuError::Storage(format!(
                    "failed to create {}: {e}",
                    self.settings.recordings_dir.display()
                ))
            })?;

        let meeting = self
            .meetings
            .create(&request.room_id, request.meeting_participants.clone())
            .await?;

        let started = Instant::now();
        let stem = format!(
            "{}_{}",
            sanitize_file_stem(&request.room_id),
            Utc::now().timestamp_millis()
        );
        let sdp_path = self.settings.recordings_dir.join(format!("{stem}.sdp"));
        let output_path = self.settings.recordings_dir.join(format!("{stem}.mp4"));

        let mut resources = SessionResources::default();
        match self
            .launch(room, &streams, &sdp_path, &output_path, &mut resources)
            .await
        {
            Ok(child) => {
                let session_id = Uuid::new_v4().to_string();
                info!(
                    target: "sfu.recording",
                    session_id = %session_id,
                    meeting_id = %meeting.id,
                    participants = streams.len(),
                    output = %output_path.display(),
                    "Recording launched"
                );
                Ok(spawn_session(
                    child,
                    resources,
                    SessionContext {
                        session_id,
                        room_id: request.room_id,
                        meeting_id: meeting.id,
                        output_path,
                        participants: request.meeting_participants,
                        settle_delay: self.settings.settle_delay,
                        keyframe_interval: self.settings.keyframe_interval,
                        meetings: Arc::clone(&self.meetings),
                        blob_store: Arc::clone(&self.blob_store),
                        publisher: Arc::clone(&self.publisher),
                    },
                ))
            }
            Err(e) => {
                warn!(target: "sfu.recording", error = %e, "Recording launch failed");
                resources.cleanup().await;
                if let Err(complete_err) = self.meetings.complete(&meeting.id, None).await {
                    warn!(
                        target: "sfu.recording",
                        meeting_id = %meeting.id,
                        error = %complete_err,
                        "Failed to complete meeting record"
                    );
                }
                metrics::record_recording("failed", started.elapsed());
                Err(e)
            }
        }
    }

    async fn launch(
        &self,
        room: &MediaRoom,
        streams: &[(Arc<dyn Producer>, Arc<dyn Producer>)],
        sdp_path: &Path,
        output_path: &Path,
        resources: &mut SessionResources,
    ) -> Result<Child, SfuError> {
        let grid = GridLayout::compute(
            streams.len(),
            self.settings.max_width,
            self.settings.max_height,
        )
        .ok_or(SfuError::NoValidProducers)?;

        let mut ports = allocate_ports(streams.len() * 2)?.into_iter();
        let rtp_capabilities = room.rtp_capabilities();
        let mut sdp_streams = Vec::with_capacity(streams.len() * 2);

        for (video, audio) in streams {
            for producer in [video, audio] {
                let port = ports.next().ok_or_else(|| {
                    SfuError::ResourceExhausted("not enough recording ports".to_string())
                })?;

                let transport = room.create_plain_transport().await?;
                resources.transports.push(Arc::clone(&transport));
                transport.connect(LOOPBACK_IP, port).await?;

                let consumer = transport
                    .consume(ConsumeOptions {
                        producer_id: producer.id().to_string(),
                        rtp_capabilities: rtp_capabilities.clone(),
                        paused: true,
                    })
                    .await?;
                resources.consumers.push(Arc::clone(&consumer));

                sdp_streams.push(SdpStream::from_rtp_parameters(
                    producer.kind(),
                    port,
                    &consumer.rtp_parameters(),
                )?);
            }
        }

        tokio::fs::write(sdp_path, build_sdp(&sdp_streams))
            .await
            .map_err(|e| {
                SfuError::Storage(format!("failed to write {}: {e}", sdp_path.display()))
            })?;
        resources.sdp_path = Some(sdp_path.to_path_buf());

        Command::new(&self.settings.transcoder_path)
            .args(transcoder_args(sdp_path, output_path, streams.len(), &grid))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                SfuError::Transcoder(format!(
                    "failed to spawn {}: {e}",
                    self.settings.transcoder_path
                ))
            })
    }
}

/// Room ids come from clients; keep only filename-safe characters.
fn sanitize_file_stem(room_id: &str) -> String {
    let stem: String = room_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        "room".to_string()
    } else {
        stem
    }
}
