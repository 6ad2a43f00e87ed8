use crate::device::{CaptureDevice, DeviceError, MediaKind, StreamGuard};
use crate::preview::{PreviewHandle, PreviewRegistry, PreviewUrl};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, Interval, interval_at};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    Recording,
    Preview,
    Uploading,
    Posted,
}

#[derive(Debug, Clone)]
pub struct CapturedMedia {
    pub kind: MediaKind,
    pub payload: Arc<[u8]>,
    pub duration_seconds: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingError {
    AlreadyRecording,
    NotRecording,
    NoPreview,
    UploadInProgress,
    NotUploading,
    Device(DeviceError),
}

impl std::fmt::Display for RecordingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordingError::AlreadyRecording => write!(f, "already recording"),
            RecordingError::NotRecording => write!(f, "not recording"),
            RecordingError::NoPreview => write!(f, "no recording to preview"),
            RecordingError::UploadInProgress => write!(f, "upload in progress"),
            RecordingError::NotUploading => write!(f, "no upload in progress"),
            RecordingError::Device(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for RecordingError {}

impl From<DeviceError> for RecordingError {
    fn from(err: DeviceError) -> Self {
        RecordingError::Device(err)
    }
}

/// Result of feeding one timer tick into the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The tick arrived outside of Recording and was dropped.
    Stale,
    Counted(u32),
    /// The configured limit was reached and the session moved to Preview.
    AutoStopped(u32),
}

#[derive(Debug, Clone)]
pub struct RecordingOptions {
    pub kind: MediaKind,
    pub tick: Duration,
    /// Zero disables the limit.
    pub max_seconds: u32,
}

impl Default for RecordingOptions {
    fn default() -> Self {
        Self {
            kind: MediaKind::Audio,
            tick: Duration::from_secs(1),
            max_seconds: 0,
        }
    }
}

// The stream lives only in `Recording`, the preview only in `Preview`.
enum Phase {
    Idle,
    Recording {
        stream: StreamGuard,
        ticker: Interval,
        chunks: Vec<Vec<u8>>,
    },
    Preview {
        media: CapturedMedia,
        handle: PreviewHandle,
    },
    Uploading {
        media: CapturedMedia,
    },
    Posted,
}

pub struct RecordingSession {
    device: Arc<dyn CaptureDevice>,
    previews: PreviewRegistry,
    options: RecordingOptions,
    phase: Phase,
    elapsed_seconds: u32,
}

impl RecordingSession {
    pub fn new(
        device: Arc<dyn CaptureDevice>,
        previews: PreviewRegistry,
        options: RecordingOptions,
    ) -> Self {
        Self {
            device,
            previews,
            options,
            phase: Phase::Idle,
            elapsed_seconds: 0,
        }
    }

    pub fn state(&self) -> RecordingState {
        match self.phase {
            Phase::Idle => RecordingState::Idle,
            Phase::Recording { .. } => RecordingState::Recording,
            Phase::Preview { .. } => RecordingState::Preview,
            Phase::Uploading { .. } => RecordingState::Uploading,
            Phase::Posted => RecordingState::Posted,
        }
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.phase, Phase::Recording { .. })
    }

    pub fn elapsed_seconds(&self) -> u32 {
        self.elapsed_seconds
    }

    pub fn preview_url(&self) -> Option<&PreviewUrl> {
        match &self.phase {
            Phase::Preview { handle, .. } => Some(handle.url()),
            _ => None,
        }
    }

    pub fn captured(&self) -> Option<&CapturedMedia> {
        match &self.phase {
            Phase::Preview { media, .. } | Phase::Uploading { media } => Some(media),
            _ => None,
        }
    }

    /// Acquire the device and begin counting. Any previous preview is revoked before
    /// the device is requested.
    pub async fn start(&mut self) -> Result<(), RecordingError> {
        match self.phase {
            Phase::Recording { .. } => return Err(RecordingError::AlreadyRecording),
            Phase::Uploading { .. } => return Err(RecordingError::UploadInProgress),
            _ => {}
        }

        self.phase = Phase::Idle;
        self.elapsed_seconds = 0;

        let stream = match self.device.request_stream(self.options.kind).await {
            Ok(stream) => StreamGuard::new(stream),
            Err(err) => {
                tracing::warn!(error = %err, "capture device unavailable");
                return Err(err.into());
            }
        };

        let period = self.options.tick;
        self.phase = Phase::Recording {
            stream,
            ticker: interval_at(Instant::now() + period, period),
            chunks: Vec::new(),
        };
        tracing::info!("recording started");
        Ok(())
    }

    /// Re-record from Preview: revoke the current preview, reset the counter and
    /// re-acquire the device.
    pub async fn discard_and_restart(&mut self) -> Result<(), RecordingError> {
        if !matches!(self.phase, Phase::Preview { .. }) {
            return Err(RecordingError::NoPreview);
        }
        self.start().await
    }

    /// Resolves at the next timer tick while recording, never otherwise.
    pub async fn next_tick(&mut self) {
        match &mut self.phase {
            Phase::Recording { ticker, .. } => {
                ticker.tick().await;
            }
            _ => std::future::pending::<()>().await,
        }
    }

    pub fn on_tick(&mut self) -> TickOutcome {
        let Phase::Recording { stream, chunks, .. } = &mut self.phase else {
            return TickOutcome::Stale;
        };
        chunks.extend(stream.take_chunks());
        self.elapsed_seconds += 1;

        let max = self.options.max_seconds;
        if max > 0 && self.elapsed_seconds >= max {
            tracing::info!(seconds = self.elapsed_seconds, "recording limit reached");
            return match self.stop() {
                Ok(duration) => TickOutcome::AutoStopped(duration),
                Err(_) => TickOutcome::Stale,
            };
        }
        TickOutcome::Counted(self.elapsed_seconds)
    }

    /// Finalize the buffered chunks into one payload and enter Preview. The ticker is
    /// dropped in this transition, so the returned duration is final.
    pub fn stop(&mut self) -> Result<u32, RecordingError> {
        if !self.is_recording() {
            return Err(RecordingError::NotRecording);
        }
        let Phase::Recording {
            stream, mut chunks, ..
        } = std::mem::replace(&mut self.phase, Phase::Idle)
        else {
            return Err(RecordingError::NotRecording);
        };

        chunks.extend(stream.release());
        let payload: Arc<[u8]> = Arc::from(chunks.concat());
        let media = CapturedMedia {
            kind: self.options.kind,
            payload: payload.clone(),
            duration_seconds: self.elapsed_seconds,
        };
        let handle = self.previews.create(payload);
        tracing::info!(
            seconds = media.duration_seconds,
            bytes = media.payload.len(),
            "recording stopped"
        );
        self.phase = Phase::Preview { media, handle };
        Ok(self.elapsed_seconds)
    }

    /// Drop the recording or preview without producing output. Returns whether there
    /// was anything to cancel.
    pub fn cancel(&mut self) -> bool {
        match self.phase {
            Phase::Recording { .. } | Phase::Preview { .. } => {
                self.phase = Phase::Idle;
                self.elapsed_seconds = 0;
                tracing::info!("recording cancelled");
                true
            }
            _ => false,
        }
    }

    /// Hand the captured media to an uploader. The preview is revoked while the upload
    /// is in flight and recreated by [`RecordingSession::upload_failed`].
    pub fn begin_upload(&mut self) -> Result<CapturedMedia, RecordingError> {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Preview { media, handle } => {
                drop(handle);
                self.phase = Phase::Uploading {
                    media: media.clone(),
                };
                Ok(media)
            }
            other => {
                self.phase = other;
                Err(RecordingError::NoPreview)
            }
        }
    }

    pub fn upload_failed(&mut self) -> Result<(), RecordingError> {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Uploading { media } => {
                let handle = self.previews.create(media.payload.clone());
                self.phase = Phase::Preview { media, handle };
                Ok(())
            }
            other => {
                self.phase = other;
                Err(RecordingError::NotUploading)
            }
        }
    }

    pub fn upload_succeeded(&mut self) -> Result<(), RecordingError> {
        if !matches!(self.phase, Phase::Uploading { .. }) {
            return Err(RecordingError::NotUploading);
        }
        self.phase = Phase::Posted;
        Ok(())
    }

    /// Release everything from any state. Safe to call repeatedly.
    pub fn dispose(&mut self) {
        if !matches!(self.phase, Phase::Idle) {
            tracing::debug!(state = ?self.state(), "disposing recording session");
        }
        self.phase = Phase::Idle;
        self.elapsed_seconds = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::{RecordingError, RecordingOptions, RecordingSession, RecordingState, TickOutcome};
    use crate::device::{DeviceError, SyntheticMicrophone, SyntheticMode};
    use crate::preview::PreviewRegistry;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn session(mic: &SyntheticMicrophone, registry: &PreviewRegistry) -> RecordingSession {
        RecordingSession::new(
            Arc::new(mic.clone()),
            registry.clone(),
            RecordingOptions::default(),
        )
    }

    #[tokio::test]
    async fn three_ticks_report_three_seconds_in_preview() {
        let mic = SyntheticMicrophone::default();
        let registry = PreviewRegistry::new();
        let mut recorder = session(&mic, &registry);

        recorder.start().await.expect("start");
        for _ in 0..3 {
            recorder.on_tick();
        }
        let duration = recorder.stop().expect("stop");

        assert_eq!(duration, 3);
        assert_eq!(recorder.state(), RecordingState::Preview);
        assert_eq!(recorder.captured().map(|m| m.duration_seconds), Some(3));
        assert_eq!(mic.open_streams(), 0);
        assert_eq!(registry.active_count(), 1);
    }

    #[tokio::test]
    async fn ticks_after_stop_are_stale() {
        let mic = SyntheticMicrophone::default();
        let registry = PreviewRegistry::new();
        let mut recorder = session(&mic, &registry);

        recorder.start().await.expect("start");
        recorder.on_tick();
        recorder.stop().expect("stop");

        assert_eq!(recorder.on_tick(), TickOutcome::Stale);
        assert_eq!(recorder.elapsed_seconds(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_drives_the_counter() {
        let mic = SyntheticMicrophone::default();
        let registry = PreviewRegistry::new();
        let mut recorder = session(&mic, &registry);

        recorder.start().await.expect("start");
        for _ in 0..2 {
            recorder.next_tick().await;
            recorder.on_tick();
        }

        assert_eq!(recorder.stop(), Ok(2));
        let idle = tokio::time::timeout(Duration::from_secs(5), recorder.next_tick()).await;
        assert!(idle.is_err(), "no ticks once out of Recording");
    }

    #[tokio::test]
    async fn denied_device_leaves_session_idle() {
        let mic = SyntheticMicrophone::with_mode(SyntheticMode::PermissionDenied);
        let registry = PreviewRegistry::new();
        let mut recorder = session(&mic, &registry);

        let err = recorder.start().await.expect_err("denied");
        assert_eq!(err, RecordingError::Device(DeviceError::PermissionDenied));
        assert_eq!(recorder.state(), RecordingState::Idle);
        assert_eq!(mic.open_streams(), 0);
    }

    #[tokio::test]
    async fn restart_revokes_previous_preview() {
        let mic = SyntheticMicrophone::default();
        let registry = PreviewRegistry::new();
        let mut recorder = session(&mic, &registry);

        recorder.start().await.expect("start");
        recorder.stop().expect("stop");
        let first = recorder.preview_url().cloned().expect("preview");

        recorder.discard_and_restart().await.expect("restart");
        assert!(!registry.is_active(&first));
        assert_eq!(recorder.elapsed_seconds(), 0);
        assert_eq!(mic.open_streams(), 1);

        recorder.stop().expect("stop again");
        assert_eq!(registry.active_count(), 1);
    }

    #[tokio::test]
    async fn failed_upload_returns_to_a_postable_preview() {
        let mic = SyntheticMicrophone::default();
        let registry = PreviewRegistry::new();
        let mut recorder = session(&mic, &registry);

        recorder.start().await.expect("start");
        recorder.on_tick();
        recorder.stop().expect("stop");

        let media = recorder.begin_upload().expect("upload");
        assert_eq!(media.duration_seconds, 1);
        assert_eq!(registry.active_count(), 0);

        recorder.upload_failed().expect("rollback");
        assert_eq!(recorder.state(), RecordingState::Preview);
        assert_eq!(registry.active_count(), 1);

        recorder.begin_upload().expect("retry");
        recorder.upload_succeeded().expect("posted");
        assert_eq!(recorder.state(), RecordingState::Posted);
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn auto_stop_at_limit() {
        let mic = SyntheticMicrophone::default();
        let registry = PreviewRegistry::new();
        let mut recorder = RecordingSession::new(
            Arc::new(mic.clone()),
            registry.clone(),
            RecordingOptions {
                max_seconds: 2,
                ..RecordingOptions::default()
            },
        );

        recorder.start().await.expect("start");
        assert_eq!(recorder.on_tick(), TickOutcome::Counted(1));
        assert_eq!(recorder.on_tick(), TickOutcome::AutoStopped(2));
        assert_eq!(recorder.state(), RecordingState::Preview);
        assert_eq!(mic.open_streams(), 0);
    }

    #[derive(Debug, Clone, Copy)]
    enum Op {
        Start,
        Tick,
        Stop,
        ReRecord,
        Cancel,
        BeginUpload,
        UploadFailed,
        UploadSucceeded,
        Dispose,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Start),
            Just(Op::Tick),
            Just(Op::Stop),
            Just(Op::ReRecord),
            Just(Op::Cancel),
            Just(Op::BeginUpload),
            Just(Op::UploadFailed),
            Just(Op::UploadSucceeded),
            Just(Op::Dispose),
        ]
    }

    proptest! {
        #[test]
        fn stream_held_iff_recording(ops in prop::collection::vec(op(), 0..40)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .expect("runtime");
            runtime.block_on(async {
                let mic = SyntheticMicrophone::default();
                let registry = PreviewRegistry::new();
                let mut recorder = session(&mic, &registry);

                for op in ops {
                    match op {
                        Op::Start => { let _ = recorder.start().await; }
                        Op::Tick => { recorder.on_tick(); }
                        Op::Stop => { let _ = recorder.stop(); }
                        Op::ReRecord => { let _ = recorder.discard_and_restart().await; }
                        Op::Cancel => { recorder.cancel(); }
                        Op::BeginUpload => { let _ = recorder.begin_upload(); }
                        Op::UploadFailed => { let _ = recorder.upload_failed(); }
                        Op::UploadSucceeded => { let _ = recorder.upload_succeeded(); }
                        Op::Dispose => recorder.dispose(),
                    }

                    let recording = recorder.state() == RecordingState::Recording;
                    let previewing = recorder.state() == RecordingState::Preview;
                    assert_eq!(mic.open_streams() == 1, recording);
                    assert!(mic.open_streams() <= 1);
                    assert_eq!(recorder.preview_url().is_some(), previewing);
                    assert_eq!(registry.active_count(), usize::from(previewing));
                }

                recorder.dispose();
                assert_eq!(mic.open_streams(), 0);
                assert_eq!(registry.active_count(), 0);
                assert_eq!(mic.stopped_streams(), mic.granted_streams());
            });
        }
    }
}
