//! Glue between the kernel, the event loop and plane views.
//!
//! - [`IdleScheduler`] defers work to the next event-loop iteration. The
//!   mode-set path uses it so that `attach` never re-enters its caller through
//!   a frame handler.
//! - [`PageFlipRegistry`] maps each CRTC to the view of the plane driving it.
//!   The kernel tags page-flip completions with the CRTC, so that is the key
//!   used to route them back.
//! - [`insert_page_flip_source`] registers the DRM fd with calloop and feeds
//!   completions into a registry.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::os::fd::AsFd;
use std::rc::{Rc, Weak};

use calloop::generic::Generic;
use calloop::{Interest, LoopHandle, Mode, PostAction, RegistrationToken};
use drm::control::crtc;
use nix::time::{clock_gettime, ClockId};

use crate::device::{duration_to_msec, KmsDevice, PageFlipCompletion};
use crate::error::BackendError;
use crate::view::{ViewHandlers, WeakViewHandlers};

/// Runs a task once the event loop is idle.
pub trait IdleScheduler {
    fn schedule_idle(&self, task: Box<dyn FnOnce()>);
}

impl<Data: 'static> IdleScheduler for LoopHandle<'static, Data> {
    fn schedule_idle(&self, task: Box<dyn FnOnce()>) {
        let _ = self.insert_idle(move |_| task());
    }
}

/// Current `CLOCK_MONOTONIC` time in wrapping milliseconds.
pub fn monotonic_msec() -> u32 {
    match clock_gettime(ClockId::CLOCK_MONOTONIC) {
        Ok(now) => duration_to_msec(now.into()),
        Err(errno) => {
            tracing::warn!(%errno, "clock_gettime(CLOCK_MONOTONIC) failed");
            0
        }
    }
}

type FlipTable = RefCell<HashMap<crtc::Handle, WeakViewHandlers>>;

/// Side table routing page-flip completions to plane views by CRTC.
#[derive(Clone, Default)]
pub struct PageFlipRegistry {
    planes: Rc<FlipTable>,
}

impl PageFlipRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes completions for `crtc` to `handlers` until the returned
    /// registration is dropped. A later registration for the same CRTC
    /// replaces this one.
    pub fn register(&self, crtc: crtc::Handle, handlers: &ViewHandlers) -> FlipRegistration {
        let weak = handlers.downgrade();
        if self.planes.borrow_mut().insert(crtc, weak.clone()).is_some() {
            tracing::warn!(?crtc, "Replacing existing page-flip registration");
        }
        FlipRegistration {
            planes: Rc::downgrade(&self.planes),
            crtc,
            handlers: weak,
        }
    }

    pub fn is_registered(&self, crtc: crtc::Handle) -> bool {
        self.planes.borrow().contains_key(&crtc)
    }

    /// Forwards one completion to the owning view.
    ///
    /// Returns `false` if no live plane is registered for the CRTC.
    pub fn dispatch(&self, completion: &PageFlipCompletion) -> bool {
        let handlers = self
            .planes
            .borrow()
            .get(&completion.crtc)
            .and_then(WeakViewHandlers::upgrade);
        match handlers {
            Some(handlers) => {
                tracing::trace!(crtc = ?completion.crtc, frame = completion.frame, "Page flip complete");
                handlers.frame(completion.time_msec());
                true
            }
            None => {
                tracing::debug!(crtc = ?completion.crtc, "Page flip for unregistered CRTC dropped");
                false
            }
        }
    }

    /// Reads all queued completions from `device` and dispatches them in
    /// kernel order. Returns how many reached a plane.
    pub fn dispatch_pending<D: KmsDevice>(&self, device: &D) -> usize {
        match device.page_flip_events() {
            Ok(completions) => completions
                .iter()
                .filter(|completion| self.dispatch(completion))
                .count(),
            Err(err) => {
                tracing::error!("Failed to read DRM events: {}", err);
                0
            }
        }
    }
}

impl fmt::Debug for PageFlipRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let crtcs: Vec<crtc::Handle> = self.planes.borrow().keys().copied().collect();
        f.debug_struct("PageFlipRegistry").field("crtcs", &crtcs).finish()
    }
}

/// Keeps a plane registered for page-flip completions.
#[derive(Debug)]
pub struct FlipRegistration {
    planes: Weak<FlipTable>,
    crtc: crtc::Handle,
    handlers: WeakViewHandlers,
}

impl Drop for FlipRegistration {
    fn drop(&mut self) {
        let Some(planes) = self.planes.upgrade() else {
            return;
        };
        let mut planes = planes.borrow_mut();
        if planes
            .get(&self.crtc)
            .is_some_and(|current| current.ptr_eq(&self.handlers))
        {
            planes.remove(&self.crtc);
        }
    }
}

/// Registers `device`'s fd with the event loop so that page-flip completions
/// are delivered through `registry` as soon as the kernel reports them.
pub fn insert_page_flip_source<D, Data>(
    handle: &LoopHandle<'static, Data>,
    device: Rc<D>,
    registry: PageFlipRegistry,
) -> Result<RegistrationToken, BackendError>
where
    D: KmsDevice + AsFd + 'static,
    Data: 'static,
{
    let fd = device.as_fd().try_clone_to_owned()?;
    let source = Generic::new(fd, Interest::READ, Mode::Level);
    let token = handle
        .insert_source(source, move |_readiness, _fd, _data| {
            registry.dispatch_pending(&*device);
            Ok(PostAction::Continue)
        })
        .map_err(|err| err.error)?;
    tracing::debug!("DRM event source registered");
    Ok(token)
}
