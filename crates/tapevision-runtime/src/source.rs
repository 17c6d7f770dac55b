//! Frame sources.
//!
//! A [`FrameSource`] hands out one [`FrameBuffer`] per call. Sources that
//! pace themselves block inside [`FrameSource::next_frame`]; sources fed from
//! elsewhere give up after a short timeout so the calling loop can notice a
//! stop request.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use image::RgbImage;
use tapevision_core::FrameBuffer;

/// How long [`ChannelSource`] waits before reporting [`SourceError::Timeout`].
pub const CHANNEL_POLL: Duration = Duration::from_millis(100);

#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    #[error("failed to read {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("no frame available yet")]
    Timeout,
    #[error("source disconnected")]
    Disconnected,
}

pub trait FrameSource: Send {
    /// Stable identifier, used as the camera key in configuration.
    fn id(&self) -> &str;

    fn next_frame(&mut self) -> Result<FrameBuffer, SourceError>;
}

/// One in-memory image served repeatedly at a fixed rate.
pub struct StaticSource {
    id: String,
    frame: FrameBuffer,
    period: Duration,
    next_due: Option<Instant>,
}

impl StaticSource {
    /// `fps <= 0` serves frames as fast as they are requested.
    pub fn new(id: impl Into<String>, image: RgbImage, fps: f64) -> Self {
        let period = if fps > 0.0 {
            Duration::from_secs_f64(1.0 / fps)
        } else {
            Duration::ZERO
        };
        Self {
            id: id.into(),
            frame: FrameBuffer::acquire(image),
            period,
            next_due: None,
        }
    }
}

impl FrameSource for StaticSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn next_frame(&mut self) -> Result<FrameBuffer, SourceError> {
        let now = Instant::now();
        if let Some(due) = self.next_due {
            if due > now {
                thread::sleep(due - now);
            }
        }
        self.next_due = Some(self.next_due.map_or(now, |d| d.max(now)) + self.period);
        Ok(self.frame.clone())
    }
}

/// An image file decoded once at open and then served like [`StaticSource`].
pub struct FileSource {
    path: PathBuf,
    inner: StaticSource,
}

impl FileSource {
    pub fn open(id: impl Into<String>, path: impl AsRef<Path>, fps: f64) -> Result<Self, SourceError> {
        let path = path.as_ref().to_path_buf();
        let image = image::open(&path)
            .map_err(|source| SourceError::Image {
                path: path.clone(),
                source,
            })?
            .to_rgb8();
        log::debug!(
            "opened {} ({}x{})",
            path.display(),
            image.width(),
            image.height()
        );
        Ok(Self {
            inner: StaticSource::new(id, image, fps),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameSource for FileSource {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn next_frame(&mut self) -> Result<FrameBuffer, SourceError> {
        self.inner.next_frame()
    }
}

/// Frames pushed from another thread, e.g. a capture driver.
pub struct ChannelSource {
    id: String,
    frames: Receiver<FrameBuffer>,
}

impl ChannelSource {
    /// Create a source and the sender that feeds it.
    pub fn new(id: impl Into<String>, capacity: usize) -> (Self, Sender<FrameBuffer>) {
        let (tx, rx) = bounded(capacity.max(1));
        (
            Self {
                id: id.into(),
                frames: rx,
            },
            tx,
        )
    }
}

impl FrameSource for ChannelSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn next_frame(&mut self) -> Result<FrameBuffer, SourceError> {
        match self.frames.recv_timeout(CHANNEL_POLL) {
            Ok(frame) => Ok(frame),
            Err(RecvTimeoutError::Timeout) => Err(SourceError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(SourceError::Disconnected),
        }
    }
}
