//! Render buffers and the capabilities other subsystems attach to them.
//!
//! A [`RenderBuffer`] owns its pixel memory (through whichever allocator created
//! it) and carries a small capability table:
//!
//! - **Exporters** answer "give me your object of kind X" queries. The allocator
//!   registers one for the raw [`ObjectKind::DrmHandle`], and the scan-out code
//!   registers one for the kernel [`ObjectKind::Framebuffer`] it created.
//! - **Destructors** run exactly once, when the buffer itself is dropped. They
//!   tie the lifetime of derived kernel objects to the buffer.
//!
//! Buffers are single-threaded: the table sits behind a `RefCell` so capabilities
//! can be attached through a shared reference while the buffer is being presented.

use std::cell::RefCell;
use std::collections::TryReserveError;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Represents a unique identifier for a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(u64);

impl BufferId {
    /// Creates a new, unique `BufferId` from a process-wide counter.
    fn new_unique() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        BufferId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buffer#{}", self.0)
    }
}

/// Enumerates the pixel formats a scan-out buffer may use.
///
/// These align with the DRM fourcc formats of the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferFormat {
    /// 32-bit XRGB format, 8 bits per channel, alpha ignored (X).
    Xrgb8888,
}

impl BufferFormat {
    /// Bits of colour information per pixel (the legacy DRM "depth").
    pub fn depth(self) -> u32 {
        match self {
            BufferFormat::Xrgb8888 => 24,
        }
    }

    /// Storage bits per pixel.
    pub fn bits_per_pixel(self) -> u32 {
        match self {
            BufferFormat::Xrgb8888 => 32,
        }
    }
}

/// Kinds of objects a buffer can be asked to export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// The GEM handle of the buffer's memory on the DRM device.
    DrmHandle,
    /// The id of a kernel framebuffer object created from this buffer.
    Framebuffer,
}

/// A capability that can produce objects derived from a buffer.
pub trait Exporter {
    /// Returns the object of the requested kind, or `None` if this exporter
    /// does not know about that kind.
    fn export(&self, kind: ObjectKind) -> Option<u32>;
}

impl<F> Exporter for F
where
    F: Fn(ObjectKind) -> Option<u32>,
{
    fn export(&self, kind: ObjectKind) -> Option<u32> {
        self(kind)
    }
}

type Destructor = Box<dyn FnOnce()>;

/// Immutable description of a buffer's memory layout.
#[derive(Debug, Clone, PartialEq, Eq)]
struct BufferDetails {
    /// Unique identifier for this buffer.
    id: BufferId,
    /// Width of the buffer in pixels.
    width: u32,
    /// Height of the buffer in pixels.
    height: u32,
    /// Stride of the buffer in bytes (bytes per row).
    stride: u32,
    /// Pixel format of the buffer.
    format: BufferFormat,
}

/// A pixel buffer plus the capabilities attached to it.
pub struct RenderBuffer {
    details: BufferDetails,
    exporters: RefCell<Vec<Box<dyn Exporter>>>,
    destructors: RefCell<Vec<Destructor>>,
}

impl RenderBuffer {
    /// Creates a buffer description with an empty capability table.
    ///
    /// A unique [`BufferId`] is generated automatically.
    pub fn new(width: u32, height: u32, stride: u32, format: BufferFormat) -> Self {
        debug_assert!(width > 0, "Buffer width must be positive.");
        debug_assert!(height > 0, "Buffer height must be positive.");

        Self {
            details: BufferDetails {
                id: BufferId::new_unique(),
                width,
                height,
                stride,
                format,
            },
            exporters: RefCell::new(Vec::new()),
            destructors: RefCell::new(Vec::new()),
        }
    }

    pub fn id(&self) -> BufferId {
        self.details.id
    }

    pub fn width(&self) -> u32 {
        self.details.width
    }

    pub fn height(&self) -> u32 {
        self.details.height
    }

    pub fn stride(&self) -> u32 {
        self.details.stride
    }

    pub fn format(&self) -> BufferFormat {
        self.details.format
    }

    /// Asks the attached exporters for an object of `kind`.
    ///
    /// The most recently attached exporter is consulted first.
    pub fn export(&self, kind: ObjectKind) -> Option<u32> {
        self.exporters
            .borrow()
            .iter()
            .rev()
            .find_map(|exporter| exporter.export(kind))
    }

    /// Reserves room for further capabilities so that a later pair of
    /// [`add_exporter`](Self::add_exporter) / [`add_destructor`](Self::add_destructor)
    /// calls cannot fail half-way.
    pub fn reserve_capabilities(
        &self,
        exporters: usize,
        destructors: usize,
    ) -> Result<(), TryReserveError> {
        self.exporters.borrow_mut().try_reserve(exporters)?;
        self.destructors.borrow_mut().try_reserve(destructors)
    }

    /// Attaches an exporter to this buffer.
    pub fn add_exporter(&self, exporter: impl Exporter + 'static) -> Result<(), TryReserveError> {
        let mut exporters = self.exporters.borrow_mut();
        exporters.try_reserve(1)?;
        exporters.push(Box::new(exporter));
        Ok(())
    }

    /// Attaches a destructor that runs when this buffer is dropped.
    ///
    /// Destructors run in the order they were attached.
    pub fn add_destructor(&self, destructor: impl FnOnce() + 'static) -> Result<(), TryReserveError> {
        let mut destructors = self.destructors.borrow_mut();
        destructors.try_reserve(1)?;
        destructors.push(Box::new(destructor));
        Ok(())
    }

    pub fn exporter_count(&self) -> usize {
        self.exporters.borrow().len()
    }

    pub fn destructor_count(&self) -> usize {
        self.destructors.borrow().len()
    }
}

impl Drop for RenderBuffer {
    fn drop(&mut self) {
        let destructors = std::mem::take(self.destructors.get_mut());
        if !destructors.is_empty() {
            tracing::trace!(buffer = %self.details.id, count = destructors.len(), "Running buffer destructors");
        }
        for destructor in destructors {
            destructor();
        }
    }
}

impl fmt::Debug for RenderBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderBuffer")
            .field("details", &self.details)
            .field("exporters", &self.exporter_count())
            .field("destructors", &self.destructor_count())
            .finish()
    }
}
