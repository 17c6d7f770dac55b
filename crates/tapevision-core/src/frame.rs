//! Reference-counted frame handles.
//!
//! A [`FrameBuffer`] is a handle to one image allocation. Cloning a handle
//! is a cheap reference-count increment; dropping or [`FrameBuffer::release`]ing
//! it is the matching decrement, and the allocation is freed when the last
//! handle goes away.
//!
//! Two process-wide counters back the leak audit:
//! - live handles: +1 on acquire and clone, -1 on the first release of a handle,
//! - live allocations: +1 when pixel memory is created, -1 when it is freed.
//!
//! Releasing a handle twice is a no-op; only the first release decrements.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::frame_image::FrameImage;

static LIVE_HANDLES: AtomicUsize = AtomicUsize::new(0);
static LIVE_ALLOCATIONS: AtomicUsize = AtomicUsize::new(0);

/// Snapshot of the process-wide frame counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameAudit {
    pub live_handles: usize,
    pub live_allocations: usize,
}

/// Read the process-wide frame counters.
pub fn frame_audit() -> FrameAudit {
    FrameAudit {
        live_handles: LIVE_HANDLES.load(Ordering::SeqCst),
        live_allocations: LIVE_ALLOCATIONS.load(Ordering::SeqCst),
    }
}

struct FrameAllocation {
    image: FrameImage,
}

impl FrameAllocation {
    fn new(image: FrameImage) -> Self {
        LIVE_ALLOCATIONS.fetch_add(1, Ordering::SeqCst);
        Self { image }
    }
}

// `Arc::make_mut` copies the allocation when it is shared; the copy is a new
// allocation and is counted as one.
impl Clone for FrameAllocation {
    fn clone(&self) -> Self {
        Self::new(self.image.clone())
    }
}

impl Drop for FrameAllocation {
    fn drop(&mut self) {
        LIVE_ALLOCATIONS.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Handle to a shared image allocation.
pub struct FrameBuffer {
    inner: Option<Arc<FrameAllocation>>,
}

impl FrameBuffer {
    /// Take ownership of `image` and return the first handle to it.
    pub fn acquire(image: impl Into<FrameImage>) -> Self {
        LIVE_HANDLES.fetch_add(1, Ordering::SeqCst);
        Self {
            inner: Some(Arc::new(FrameAllocation::new(image.into()))),
        }
    }

    /// Pixel data, or `None` once this handle has been released.
    #[inline]
    pub fn image(&self) -> Option<&FrameImage> {
        self.inner.as_deref().map(|a| &a.image)
    }

    /// Mutable pixel data.
    ///
    /// If other handles share the allocation it is copied first, so the
    /// other owners never observe the mutation.
    pub fn image_mut(&mut self) -> Option<&mut FrameImage> {
        self.inner.as_mut().map(|a| &mut Arc::make_mut(a).image)
    }

    #[inline]
    pub fn is_released(&self) -> bool {
        self.inner.is_none()
    }

    /// Number of handles sharing this allocation (0 if released).
    pub fn ref_count(&self) -> usize {
        self.inner.as_ref().map_or(0, Arc::strong_count)
    }

    pub fn width(&self) -> u32 {
        self.image().map_or(0, FrameImage::width)
    }

    pub fn height(&self) -> u32 {
        self.image().map_or(0, FrameImage::height)
    }

    /// Release this handle.
    ///
    /// Returns `true` if the handle was live. Later calls (and the eventual
    /// drop) do nothing.
    pub fn release(&mut self) -> bool {
        match self.inner.take() {
            Some(allocation) => {
                LIVE_HANDLES.fetch_sub(1, Ordering::SeqCst);
                drop(allocation);
                true
            }
            None => false,
        }
    }
}

impl Clone for FrameBuffer {
    fn clone(&self) -> Self {
        match &self.inner {
            Some(allocation) => {
                LIVE_HANDLES.fetch_add(1, Ordering::SeqCst);
                Self {
                    inner: Some(Arc::clone(allocation)),
                }
            }
            None => Self { inner: None },
        }
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.image() {
            Some(img) => f
                .debug_struct("FrameBuffer")
                .field("width", &img.width())
                .field("height", &img.height())
                .field("refs", &self.ref_count())
                .finish(),
            None => f.write_str("FrameBuffer(released)"),
        }
    }
}
