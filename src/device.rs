use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

/// Why the capture device could not be acquired.
///
/// `NotFound` and `PermissionDenied` are kept apart so screens can phrase the prompt
/// differently ("plug in a microphone" vs. "allow microphone access").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    NotFound,
    PermissionDenied,
    Other(String),
}

impl DeviceError {
    pub fn user_message(&self) -> &str {
        match self {
            DeviceError::NotFound => "No microphone was found. Connect one and try again.",
            DeviceError::PermissionDenied => {
                "Microphone access was denied. Allow it in your settings to record."
            }
            DeviceError::Other(_) => "The microphone could not be started.",
        }
    }
}

impl std::fmt::Display for DeviceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceError::NotFound => write!(f, "capture device not found"),
            DeviceError::PermissionDenied => write!(f, "capture device permission denied"),
            DeviceError::Other(message) => write!(f, "capture device error: {message}"),
        }
    }
}

impl std::error::Error for DeviceError {}

/// A live stream handed out by a [`CaptureDevice`].
pub trait MediaStream: Send {
    /// Drain whatever the device buffered since the last call.
    fn take_chunks(&mut self) -> Vec<Vec<u8>>;
    fn stop(&mut self);
}

#[async_trait]
pub trait CaptureDevice: Send + Sync {
    async fn request_stream(&self, kind: MediaKind) -> Result<Box<dyn MediaStream>, DeviceError>;
}

/// Owns a stream and stops it exactly once, either through [`StreamGuard::release`]
/// or when dropped.
pub struct StreamGuard {
    stream: Option<Box<dyn MediaStream>>,
}

impl StreamGuard {
    pub fn new(stream: Box<dyn MediaStream>) -> Self {
        Self {
            stream: Some(stream),
        }
    }

    pub fn take_chunks(&mut self) -> Vec<Vec<u8>> {
        self.stream
            .as_mut()
            .map(|stream| stream.take_chunks())
            .unwrap_or_default()
    }

    /// Stop the device and hand back the chunks that were still buffered.
    pub fn release(mut self) -> Vec<Vec<u8>> {
        match self.stream.take() {
            Some(mut stream) => {
                let tail = stream.take_chunks();
                stream.stop();
                tail
            }
            None => Vec::new(),
        }
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntheticMode {
    Available,
    NotFound,
    PermissionDenied,
}

/// In-process microphone that emits one fixed-size chunk per poll. Used by the CLI
/// and tests; it counts open streams so callers can check that nothing leaks.
#[derive(Debug, Clone)]
pub struct SyntheticMicrophone {
    mode: SyntheticMode,
    chunk_bytes: usize,
    open: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
    granted: Arc<AtomicUsize>,
}

impl Default for SyntheticMicrophone {
    fn default() -> Self {
        Self::with_mode(SyntheticMode::Available)
    }
}

impl SyntheticMicrophone {
    pub fn with_mode(mode: SyntheticMode) -> Self {
        Self {
            mode,
            chunk_bytes: 320,
            open: Arc::new(AtomicUsize::new(0)),
            stops: Arc::new(AtomicUsize::new(0)),
            granted: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn open_streams(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn stopped_streams(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn granted_streams(&self) -> usize {
        self.granted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptureDevice for SyntheticMicrophone {
    async fn request_stream(&self, _kind: MediaKind) -> Result<Box<dyn MediaStream>, DeviceError> {
        match self.mode {
            SyntheticMode::NotFound => Err(DeviceError::NotFound),
            SyntheticMode::PermissionDenied => Err(DeviceError::PermissionDenied),
            SyntheticMode::Available => {
                self.open.fetch_add(1, Ordering::SeqCst);
                self.granted.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(SyntheticStream {
                    open: self.open.clone(),
                    stops: self.stops.clone(),
                    chunk_bytes: self.chunk_bytes,
                    next: 0,
                    stopped: false,
                }))
            }
        }
    }
}

struct SyntheticStream {
    open: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
    chunk_bytes: usize,
    next: u8,
    stopped: bool,
}

impl MediaStream for SyntheticStream {
    fn take_chunks(&mut self) -> Vec<Vec<u8>> {
        if self.stopped {
            return Vec::new();
        }
        let chunk = vec![self.next; self.chunk_bytes];
        self.next = self.next.wrapping_add(1);
        vec![chunk]
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.open.fetch_sub(1, Ordering::SeqCst);
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }
}
