//! Kernel framebuffer objects cached on render buffers.
//!
//! The first time a buffer is scanned out, its DRM memory handle is wrapped in
//! a kernel framebuffer object. Two capabilities are then attached to the
//! buffer: an exporter that hands the framebuffer id to later scan-outs, and a
//! destructor that removes the kernel object when the buffer is dropped. The
//! buffer owns the framebuffer's lifetime; planes never remove it themselves.
//!
//! The cache is per buffer, so every plane presenting the same buffer on the
//! same device shares one framebuffer object.

use std::rc::{Rc, Weak};

use drm::control::framebuffer;
use novade_buffer_manager::{Exporter, ObjectKind, RenderBuffer};

use crate::device::{FramebufferDescriptor, KmsDevice};
use crate::error::{DeviceOp, PlaneError, Result};

/// Exporter attached to a buffer once its framebuffer exists.
struct FramebufferExporter {
    id: framebuffer::Handle,
}

impl Exporter for FramebufferExporter {
    fn export(&self, kind: ObjectKind) -> Option<u32> {
        match kind {
            ObjectKind::Framebuffer => Some(self.id.into()),
            _ => None,
        }
    }
}

/// Returns the kernel framebuffer for `buffer`, creating it on first use.
///
/// The cached id is not tagged with the device that created it. A buffer
/// must only ever be scanned out on one DRM device: presenting it on a second
/// device returns the first device's id without creating anything there.
pub fn get_or_create<D>(device: &Rc<D>, buffer: &RenderBuffer) -> Result<framebuffer::Handle>
where
    D: KmsDevice + 'static,
{
    if let Some(id) = buffer
        .export(ObjectKind::Framebuffer)
        .and_then(drm::control::from_u32::<framebuffer::Handle>)
    {
        return Ok(id);
    }

    let handle = buffer
        .export(ObjectKind::DrmHandle)
        .and_then(drm::control::from_u32::<drm::buffer::Handle>)
        .ok_or_else(|| {
            tracing::error!(buffer = %buffer.id(), "Could not get buffer handle");
            PlaneError::InvalidBuffer(buffer.id())
        })?;

    // Room for both capabilities is reserved up front so a kernel object is
    // never created that the buffer cannot take ownership of.
    buffer
        .reserve_capabilities(1, 1)
        .map_err(|_| PlaneError::OutOfMemory("framebuffer capabilities"))?;

    let descriptor = FramebufferDescriptor {
        width: buffer.width(),
        height: buffer.height(),
        pitch: buffer.stride(),
        handle,
        depth: buffer.format().depth(),
        bpp: buffer.format().bits_per_pixel(),
    };
    let id = device
        .add_framebuffer(&descriptor)
        .map_err(|e| PlaneError::device(DeviceOp::AddFramebuffer, e))?;
    tracing::debug!(buffer = %buffer.id(), fb = ?id, "Created framebuffer object");

    let weak_device: Weak<D> = Rc::downgrade(device);
    let attached = buffer
        .add_exporter(FramebufferExporter { id })
        .and_then(|()| buffer.add_destructor(move || destroy(&weak_device, id)));
    if attached.is_err() {
        // Unreachable after the reservation above, but never leak the object.
        remove(&**device, id);
        return Err(PlaneError::OutOfMemory("framebuffer capabilities"));
    }

    Ok(id)
}

fn destroy<D: KmsDevice>(device: &Weak<D>, id: framebuffer::Handle) {
    let Some(device) = device.upgrade() else {
        // Closing the device fd already released every framebuffer on it.
        tracing::trace!(fb = ?id, "Device gone, skipping framebuffer removal");
        return;
    };
    remove(&*device, id);
}

fn remove<D: KmsDevice + ?Sized>(device: &D, id: framebuffer::Handle) {
    match device.remove_framebuffer(id) {
        Ok(()) => tracing::debug!(fb = ?id, "Removed framebuffer object"),
        Err(err) => {
            let err = PlaneError::device(DeviceOp::RemoveFramebuffer, err);
            tracing::warn!(fb = ?id, "Failed to remove framebuffer: {}", err);
        }
    }
}
