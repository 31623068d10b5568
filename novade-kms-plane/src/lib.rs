//! Double-buffered KMS scan-out for one NovaDE output.
//!
//! A [`FramebufferPlane`] owns the scan-out state of a single CRTC. The scene
//! manager hands it one [`RenderBuffer`](novade_buffer_manager::RenderBuffer)
//! per frame through [`ViewImpl::attach`]; the plane wraps the buffer in a
//! kernel framebuffer (cached on the buffer), then either performs a full
//! mode-set or queues a page flip. Frame-presented notifications come back
//! through the plane's [`View`].
//!
//! Collaborators are passed explicitly through a [`PlaneContext`]: the shared
//! [`KmsDevice`], an [`IdleScheduler`], the process-wide [`SessionSignal`] and
//! the [`PageFlipRegistry`] fed by the DRM event source.
//!
//! ```rust,ignore
//! let card = Rc::new(DrmCard::open("/dev/dri/card0")?);
//! let output = discover_output(&card, &config.output)?;
//! let ctx = PlaneContext {
//!     device: card.clone(),
//!     scheduler: Rc::new(event_loop.handle()),
//!     session: SessionSignal::new(),
//!     page_flips: PageFlipRegistry::new(),
//! };
//! insert_page_flip_source(&event_loop.handle(), card, ctx.page_flips.clone())?;
//! let mut plane = FramebufferPlane::initialize(&ctx, output.crtc, output.mode, &[output.connector])?;
//! plane.attach(&buffer)?;
//! ```

pub mod config;
pub mod device;
pub mod drm_device;
pub mod dumb;
pub mod error;
pub mod event_bridge;
pub mod framebuffer;
pub mod logging;
pub mod output;
pub mod plane;
pub mod session;
pub mod view;

#[cfg(test)]
mod testing;

pub use device::{CrtcState, FramebufferDescriptor, KmsDevice, PageFlipCompletion, ScanoutMode};
pub use drm_device::DrmCard;
pub use error::{BackendError, ConfigError, DeviceOp, PlaneError};
pub use event_bridge::{insert_page_flip_source, monotonic_msec, IdleScheduler, PageFlipRegistry};
pub use output::{choose_mode, discover_output, ModeRequest, OutputSelection};
pub use plane::{FramebufferPlane, PlaneContext, PlaneState};
pub use session::{SessionEvent, SessionSignal, Subscription};
pub use view::{Geometry, View, ViewHandler, ViewHandlers, ViewImpl};
