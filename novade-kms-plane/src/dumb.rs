//! CPU-mapped dumb buffers wrapped as [`RenderBuffer`]s.
//!
//! Only the demo binary uses these; a compositor would hand the plane buffers
//! from its renderer instead.

use std::rc::{Rc, Weak};

use drm::buffer::{Buffer, DrmFourcc};
use drm::control::Device as ControlDevice;
use novade_buffer_manager::{BufferFormat, ObjectKind, RenderBuffer};

use crate::drm_device::DrmCard;
use crate::error::{BackendError, PlaneError};

/// Allocates solid-colour XRGB8888 buffers of one size on a card.
#[derive(Debug)]
pub struct DumbBufferPool {
    card: Rc<DrmCard>,
    width: u32,
    height: u32,
}

impl DumbBufferPool {
    pub fn new(card: Rc<DrmCard>, width: u32, height: u32) -> Self {
        Self { card, width, height }
    }

    /// Creates a buffer filled with `color` (`0x00RRGGBB`).
    ///
    /// The dumb buffer is destroyed when the returned buffer is dropped, or
    /// right away if wrapping it fails.
    pub fn allocate(&self, color: u32) -> Result<RenderBuffer, BackendError> {
        let pixel_format = BufferFormat::Xrgb8888;
        let mut dumb = self.card.create_dumb_buffer(
            (self.width, self.height),
            DrmFourcc::Xrgb8888,
            pixel_format.bits_per_pixel(),
        )?;
        let mapped = self
            .card
            .map_dumb_buffer(&mut dumb)
            .map(|mut mapping| fill(mapping.as_mut(), color));

        let handle: u32 = dumb.handle().into();
        let pitch = dumb.pitch();
        let card: Weak<DrmCard> = Rc::downgrade(&self.card);
        let release = ReleaseOnDrop::new(move || {
            if let Some(card) = card.upgrade() {
                if let Err(err) = card.destroy_dumb_buffer(dumb) {
                    tracing::warn!(handle, "Failed to destroy dumb buffer: {}", err);
                }
            }
        });
        mapped?;

        let buffer = wrap(self.width, self.height, pitch, pixel_format, handle, release)?;
        tracing::debug!(buffer = %buffer.id(), handle, color = %format!("{color:#08x}"), "Allocated dumb buffer");
        Ok(buffer)
    }
}

/// Runs a release action when dropped.
struct ReleaseOnDrop<F: FnOnce()> {
    release: Option<F>,
}

impl<F: FnOnce()> ReleaseOnDrop<F> {
    fn new(release: F) -> Self {
        Self { release: Some(release) }
    }
}

impl<F: FnOnce()> Drop for ReleaseOnDrop<F> {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Wraps a kernel memory handle as a [`RenderBuffer`] exporting it.
///
/// `release` runs exactly once: when the buffer is dropped, or on the way out
/// of any failure here.
fn wrap<F>(
    width: u32,
    height: u32,
    pitch: u32,
    format: BufferFormat,
    handle: u32,
    release: ReleaseOnDrop<F>,
) -> Result<RenderBuffer, PlaneError>
where
    F: FnOnce() + 'static,
{
    let oom = |_| PlaneError::OutOfMemory("dumb buffer capabilities");
    let buffer = RenderBuffer::new(width, height, pitch, format);
    buffer.reserve_capabilities(1, 1).map_err(oom)?;
    buffer.add_destructor(move || drop(release)).map_err(oom)?;
    buffer
        .add_exporter(move |kind: ObjectKind| (kind == ObjectKind::DrmHandle).then_some(handle))
        .map_err(oom)?;
    Ok(buffer)
}

fn fill(pixels: &mut [u8], color: u32) {
    let bytes = color.to_le_bytes();
    for pixel in pixels.chunks_exact_mut(4) {
        pixel.copy_from_slice(&bytes);
    }
}
