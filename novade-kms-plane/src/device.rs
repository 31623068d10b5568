//! The kernel mode-setting seam.
//!
//! [`KmsDevice`] lists the handful of legacy KMS calls a framebuffer plane
//! issues. [`crate::drm_device::DrmCard`] implements it on top of the `drm`
//! crate; tests implement it with a recording fake.
//!
//! The device is owned elsewhere and shared with planes through an `Rc`.
//! Everything here runs on the event loop thread.

use std::fmt;
use std::io;
use std::time::Duration;

use drm::buffer::{self, DrmFourcc};
use drm::control::{connector, crtc, framebuffer};

/// A display mode as far as a plane cares about it.
pub trait ScanoutMode: Copy + fmt::Debug {
    /// Active area in pixels.
    fn size(&self) -> (u16, u16);
    /// Vertical refresh rate in Hz.
    fn vrefresh(&self) -> u32;
    /// Whether the connector advertises this mode as its preferred one.
    fn is_preferred(&self) -> bool;
}

/// Snapshot of a CRTC's configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CrtcState<M> {
    pub crtc: crtc::Handle,
    pub framebuffer: Option<framebuffer::Handle>,
    pub position: (u32, u32),
    pub mode: Option<M>,
}

/// Everything the kernel needs to wrap a memory handle into a framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramebufferDescriptor {
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    pub handle: buffer::Handle,
    pub depth: u32,
    pub bpp: u32,
}

impl buffer::Buffer for FramebufferDescriptor {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn format(&self) -> DrmFourcc {
        DrmFourcc::Xrgb8888
    }

    fn pitch(&self) -> u32 {
        self.pitch
    }

    fn handle(&self) -> buffer::Handle {
        self.handle
    }
}

/// A page flip that has taken effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFlipCompletion {
    pub crtc: crtc::Handle,
    pub frame: u32,
    /// `CLOCK_MONOTONIC` time of the vblank the flip landed on.
    pub time: Duration,
}

impl PageFlipCompletion {
    /// Completion time in milliseconds, wrapping like the frame callbacks do.
    pub fn time_msec(&self) -> u32 {
        duration_to_msec(self.time)
    }
}

/// Converts a monotonic timestamp to the wrapping millisecond clock used by
/// frame notifications.
pub fn duration_to_msec(time: Duration) -> u32 {
    (time.as_secs().wrapping_mul(1000) as u32).wrapping_add(time.subsec_micros() / 1000)
}

/// Legacy KMS operations used by a framebuffer plane.
pub trait KmsDevice {
    type Mode: ScanoutMode;

    /// Reads the current configuration of `crtc`.
    fn crtc_state(&self, crtc: crtc::Handle) -> io::Result<CrtcState<Self::Mode>>;

    /// Synchronous full mode-set.
    fn set_crtc(
        &self,
        crtc: crtc::Handle,
        framebuffer: Option<framebuffer::Handle>,
        origin: (u32, u32),
        connectors: &[connector::Handle],
        mode: Option<Self::Mode>,
    ) -> io::Result<()>;

    /// Queues a flip to `framebuffer` at the next vblank and asks the kernel
    /// for a completion event.
    fn page_flip(&self, crtc: crtc::Handle, framebuffer: framebuffer::Handle) -> io::Result<()>;

    fn add_framebuffer(&self, descriptor: &FramebufferDescriptor) -> io::Result<framebuffer::Handle>;

    fn remove_framebuffer(&self, framebuffer: framebuffer::Handle) -> io::Result<()>;

    /// Reads the page-flip completions the kernel has queued on the device.
    fn page_flip_events(&self) -> io::Result<Vec<PageFlipCompletion>>;
}
