//! The framebuffer plane: scan-out state for one output.
//!
//! A plane drives a single CRTC and its connectors in one display mode. Each
//! attached buffer is presented in one of two ways:
//!
//! - **Mode-set** (`NeedsModeset`): a synchronous `set_crtc` with the full
//!   connector set and mode. Used for the first frame and after the session is
//!   re-activated, when kernel state can no longer be trusted. The frame
//!   notification is deferred to the event loop's idle phase.
//! - **Page flip** (`Flipping`): an asynchronous flip at the next vblank. The
//!   frame notification arrives with the kernel's completion event.
//!
//! `needs_modeset` is only cleared by a successful mode-set, so a failed
//! attach is always retried with the same strategy.
//!
//! At construction the CRTC's existing configuration is captured; it is put
//! back by [`FramebufferPlane::finalize`] (or on drop) however many frames were
//! presented in between.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use drm::control::{connector, crtc, framebuffer};
use novade_buffer_manager::RenderBuffer;

use crate::device::{CrtcState, KmsDevice, ScanoutMode};
use crate::error::{DeviceOp, PlaneError, Result};
use crate::event_bridge::{monotonic_msec, FlipRegistration, IdleScheduler, PageFlipRegistry};
use crate::framebuffer as fb_cache;
use crate::session::{SessionEvent, SessionSignal, Subscription};
use crate::view::{View, ViewImpl};

/// The presentation strategy the next attach will use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneState {
    NeedsModeset,
    Flipping,
}

/// The process-wide collaborators a plane needs, passed explicitly.
pub struct PlaneContext<D> {
    pub device: Rc<D>,
    pub scheduler: Rc<dyn IdleScheduler>,
    pub session: SessionSignal,
    pub page_flips: PageFlipRegistry,
}

impl<D> Clone for PlaneContext<D> {
    fn clone(&self) -> Self {
        Self {
            device: Rc::clone(&self.device),
            scheduler: Rc::clone(&self.scheduler),
            session: self.session.clone(),
            page_flips: self.page_flips.clone(),
        }
    }
}

/// Scan-out state for one output.
pub struct FramebufferPlane<D: KmsDevice> {
    device: Rc<D>,
    scheduler: Rc<dyn IdleScheduler>,
    crtc: crtc::Handle,
    connectors: Vec<connector::Handle>,
    mode: D::Mode,
    needs_modeset: Rc<Cell<bool>>,
    original_state: Option<CrtcState<D::Mode>>,
    view: View,
    _activation: Subscription,
    _page_flips: FlipRegistration,
}

impl<D: KmsDevice> FramebufferPlane<D> {
    /// Sets up a plane for `crtc` driving `connectors` in `mode`.
    ///
    /// The CRTC's current configuration is captured for restoration at
    /// finalization. No kernel state is changed until the first attach.
    pub fn initialize(
        ctx: &PlaneContext<D>,
        crtc: crtc::Handle,
        mode: D::Mode,
        connectors: &[connector::Handle],
    ) -> Result<Self> {
        let original_state = ctx.device.crtc_state(crtc).map_err(|err| {
            tracing::error!(?crtc, "Failed to get CRTC state: {}", err);
            PlaneError::device(DeviceOp::GetCrtc, err)
        })?;

        // On failure the snapshot is simply dropped.
        let mut plane_connectors = Vec::new();
        plane_connectors.try_reserve_exact(connectors.len()).map_err(|_| {
            tracing::error!(?crtc, "Failed to allocate connector array");
            PlaneError::OutOfMemory("connector array")
        })?;
        plane_connectors.extend_from_slice(connectors);

        let needs_modeset = Rc::new(Cell::new(true));
        let flag = Rc::downgrade(&needs_modeset);
        let activation = ctx.session.subscribe(move |event| {
            if event == SessionEvent::Activated {
                if let Some(flag) = flag.upgrade() {
                    flag.set(true);
                }
            }
        });

        let (width, height) = mode.size();
        let view = View::new(u32::from(width), u32::from(height));
        let page_flips = ctx.page_flips.register(crtc, view.handlers());

        tracing::info!(
            ?crtc,
            connectors = ?plane_connectors,
            width,
            height,
            refresh = mode.vrefresh(),
            "Framebuffer plane initialized"
        );

        Ok(Self {
            device: Rc::clone(&ctx.device),
            scheduler: Rc::clone(&ctx.scheduler),
            crtc,
            connectors: plane_connectors,
            mode,
            needs_modeset,
            original_state: Some(original_state),
            view,
            _activation: activation,
            _page_flips: page_flips,
        })
    }

    pub fn state(&self) -> PlaneState {
        if self.needs_modeset.get() {
            PlaneState::NeedsModeset
        } else {
            PlaneState::Flipping
        }
    }

    pub fn crtc(&self) -> crtc::Handle {
        self.crtc
    }

    pub fn mode(&self) -> D::Mode {
        self.mode
    }

    pub fn connectors(&self) -> &[connector::Handle] {
        &self.connectors
    }

    /// The configuration captured at initialization, until it is restored.
    pub fn original_state(&self) -> Option<&CrtcState<D::Mode>> {
        self.original_state.as_ref()
    }

    /// Delivers a page-flip completion for this plane's CRTC.
    pub fn handle_page_flip(&self, time_msec: u32) {
        self.view.frame(time_msec);
    }

    /// Puts the CRTC back into the configuration captured at initialization.
    ///
    /// Only the first call does anything; it also runs on drop. Failures are
    /// logged because no caller is left to act on them.
    pub fn finalize(&mut self) {
        let Some(original) = self.original_state.take() else {
            return;
        };
        // The kernel rejects a mode without connectors.
        let connectors: &[connector::Handle] = if original.mode.is_some() {
            &self.connectors
        } else {
            &[]
        };
        match self.device.set_crtc(
            original.crtc,
            original.framebuffer,
            original.position,
            connectors,
            original.mode,
        ) {
            Ok(()) => tracing::info!(crtc = ?original.crtc, "Restored original CRTC state"),
            Err(err) => {
                tracing::error!(crtc = ?original.crtc, "Failed to restore CRTC state: {}", err)
            }
        }
    }

    fn modeset(&mut self, fb: framebuffer::Handle) -> Result<()> {
        self.device
            .set_crtc(self.crtc, Some(fb), (0, 0), &self.connectors, Some(self.mode))
            .map_err(|err| {
                let err = PlaneError::device(DeviceOp::SetCrtc, err);
                tracing::error!(crtc = ?self.crtc, ?fb, "Could not set CRTC to next framebuffer: {}", err);
                err
            })?;

        let handlers = self.view.handlers().downgrade();
        self.scheduler.schedule_idle(Box::new(move || {
            if let Some(handlers) = handlers.upgrade() {
                handlers.frame(monotonic_msec());
            }
        }));
        self.needs_modeset.set(false);
        tracing::debug!(crtc = ?self.crtc, ?fb, "Mode set");
        Ok(())
    }

    fn flip(&mut self, fb: framebuffer::Handle) -> Result<()> {
        self.device.page_flip(self.crtc, fb).map_err(|err| {
            let err = PlaneError::device(DeviceOp::PageFlip, err);
            tracing::error!(crtc = ?self.crtc, ?fb, "Page flip failed: {}", err);
            err
        })
    }
}

impl<D> ViewImpl for FramebufferPlane<D>
where
    D: KmsDevice + 'static,
{
    fn update(&mut self) -> bool {
        true
    }

    fn attach(&mut self, buffer: &RenderBuffer) -> Result<()> {
        let fb = fb_cache::get_or_create(&self.device, buffer)?;
        match self.state() {
            PlaneState::NeedsModeset => self.modeset(fb),
            PlaneState::Flipping => self.flip(fb),
        }
    }

    /// Only the logical position changes; scan-out stays at the CRTC origin.
    fn move_to(&mut self, x: i32, y: i32) -> bool {
        self.view.set_position(x, y);
        true
    }

    fn view(&self) -> &View {
        &self.view
    }
}

impl<D: KmsDevice> Drop for FramebufferPlane<D> {
    fn drop(&mut self) {
        self.finalize();
    }
}

impl<D: KmsDevice> fmt::Debug for FramebufferPlane<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramebufferPlane")
            .field("crtc", &self.crtc)
            .field("connectors", &self.connectors)
            .field("mode", &self.mode)
            .field("needs_modeset", &self.needs_modeset.get())
            .field("view", &self.view)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{connector, crtc, fb, gem_buffer, Call, MockDevice, QueueScheduler, TestMode};
    use crate::view::ViewHandler;
    use nix::errno::Errno;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;

    const MODE: TestMode = TestMode::new(1920, 1080, 60);

    #[derive(Clone, Default)]
    struct Frames(Rc<RefCell<Vec<u32>>>);

    impl ViewHandler for Frames {
        fn frame(&mut self, time_msec: u32) {
            self.0.borrow_mut().push(time_msec);
        }
    }

    struct Harness {
        device: Rc<MockDevice>,
        scheduler: Rc<QueueScheduler>,
        ctx: PlaneContext<MockDevice>,
    }

    impl Harness {
        fn new() -> Self {
            let device = Rc::new(MockDevice::new(crtc(5), MODE));
            let scheduler = Rc::new(QueueScheduler::default());
            let ctx = PlaneContext {
                device: Rc::clone(&device),
                scheduler: scheduler.clone(),
                session: SessionSignal::new(),
                page_flips: PageFlipRegistry::new(),
            };
            Self { device, scheduler, ctx }
        }

        fn plane(&self) -> FramebufferPlane<MockDevice> {
            let plane = FramebufferPlane::initialize(&self.ctx, crtc(5), MODE, &[connector(7)]).unwrap();
            self.device.take_calls();
            plane
        }

        /// Mode-set and flip calls, without framebuffer bookkeeping.
        fn kernel_calls(&self) -> Vec<Call> {
            self.device
                .take_calls()
                .into_iter()
                .filter(|call| !matches!(call, Call::AddFramebuffer(_) | Call::RemoveFramebuffer(_)))
                .collect()
        }
    }

    fn modeset(framebuffer: u32) -> Call {
        Call::SetCrtc {
            crtc: crtc(5),
            framebuffer: Some(fb(framebuffer)),
            origin: (0, 0),
            connectors: vec![connector(7)],
            mode: Some(MODE),
        }
    }

    fn flip(framebuffer: u32) -> Call {
        Call::PageFlip {
            crtc: crtc(5),
            framebuffer: fb(framebuffer),
        }
    }

    #[test]
    fn test_initialize_snapshots_crtc_without_touching_it() {
        let harness = Harness::new();

        let plane = FramebufferPlane::initialize(&harness.ctx, crtc(5), MODE, &[connector(7), connector(8)]).unwrap();

        assert_eq!(harness.device.take_calls(), vec![Call::GetCrtc(crtc(5))]);
        assert_eq!(plane.state(), PlaneState::NeedsModeset);
        assert_eq!(plane.connectors(), &[connector(7), connector(8)]);
        assert_eq!(plane.original_state().and_then(|state| state.framebuffer), Some(fb(90)));
        assert_eq!(plane.view().geometry().width, 1920);
        assert_eq!(plane.view().geometry().height, 1080);
    }

    #[test]
    fn test_initialize_fails_when_crtc_is_unreadable() {
        let harness = Harness::new();
        *harness.device.crtc_state.borrow_mut() = None;

        let err = FramebufferPlane::initialize(&harness.ctx, crtc(5), MODE, &[connector(7)]).unwrap_err();

        assert!(matches!(
            err,
            PlaneError::Device { operation: DeviceOp::GetCrtc, errno: Errno::ENOENT }
        ));
        assert_eq!(harness.ctx.session.listener_count(), 0);
        assert!(!harness.ctx.page_flips.is_registered(crtc(5)));
    }

    #[test]
    fn test_first_attach_is_a_modeset() {
        let harness = Harness::new();
        let mut plane = harness.plane();

        plane.attach(&gem_buffer(1)).unwrap();

        assert_eq!(harness.kernel_calls(), vec![modeset(100)]);
        assert_eq!(plane.state(), PlaneState::Flipping);
    }

    #[test]
    fn test_modeset_frame_is_deferred_to_idle() {
        let harness = Harness::new();
        let mut plane = harness.plane();
        let frames = Frames::default();
        plane.view().add_handler(frames.clone());

        plane.attach(&gem_buffer(1)).unwrap();
        assert!(frames.0.borrow().is_empty());
        assert_eq!(harness.scheduler.pending(), 1);

        harness.scheduler.run_pending();
        assert_eq!(frames.0.borrow().len(), 1);
    }

    #[test]
    fn test_second_attach_flips_and_waits_for_completion() {
        let harness = Harness::new();
        let mut plane = harness.plane();
        let frames = Frames::default();
        plane.view().add_handler(frames.clone());
        plane.attach(&gem_buffer(1)).unwrap();
        harness.scheduler.run_pending();
        frames.0.borrow_mut().clear();
        harness.device.take_calls();

        plane.attach(&gem_buffer(2)).unwrap();

        assert_eq!(harness.kernel_calls(), vec![flip(101)]);
        assert_eq!(harness.scheduler.pending(), 0);
        assert!(frames.0.borrow().is_empty());

        assert_eq!(harness.ctx.page_flips.dispatch_pending(&*harness.device), 1);
        assert_eq!(*frames.0.borrow(), vec![16]);
    }

    #[test]
    fn test_failed_modeset_retries_modeset() {
        let harness = Harness::new();
        let mut plane = harness.plane();
        let buffer = gem_buffer(1);
        harness.device.fail_set_crtc.set(Some(Errno::EBUSY));

        let err = plane.attach(&buffer).unwrap_err();

        assert_eq!(err.errno(), Some(Errno::EBUSY));
        assert_eq!(plane.state(), PlaneState::NeedsModeset);
        assert_eq!(harness.scheduler.pending(), 0);

        harness.device.fail_set_crtc.set(None);
        harness.device.take_calls();
        plane.attach(&buffer).unwrap();
        assert_eq!(harness.kernel_calls(), vec![modeset(100)]);
    }

    #[test]
    fn test_failed_flip_keeps_flipping() {
        let harness = Harness::new();
        let mut plane = harness.plane();
        plane.attach(&gem_buffer(1)).unwrap();
        harness.device.fail_page_flip.set(Some(Errno::EBUSY));

        let err = plane.attach(&gem_buffer(2)).unwrap_err();

        assert!(matches!(
            err,
            PlaneError::Device { operation: DeviceOp::PageFlip, errno: Errno::EBUSY }
        ));
        assert_eq!(plane.state(), PlaneState::Flipping);
    }

    #[test]
    fn test_activation_forces_modeset() {
        let harness = Harness::new();
        let mut plane = harness.plane();
        plane.attach(&gem_buffer(1)).unwrap();
        assert_eq!(plane.state(), PlaneState::Flipping);

        harness.ctx.session.emit(SessionEvent::Deactivated);
        assert_eq!(plane.state(), PlaneState::Flipping);

        harness.ctx.session.emit(SessionEvent::Activated);
        assert_eq!(plane.state(), PlaneState::NeedsModeset);

        harness.device.take_calls();
        plane.attach(&gem_buffer(2)).unwrap();
        assert_eq!(harness.kernel_calls(), vec![modeset(101)]);
    }

    #[test]
    fn test_invalid_buffer_leaves_state_alone() {
        let harness = Harness::new();
        let mut plane = harness.plane();
        let buffer = RenderBuffer::new(64, 64, 256, novade_buffer_manager::BufferFormat::Xrgb8888);

        let err = plane.attach(&buffer).unwrap_err();

        assert!(matches!(err, PlaneError::InvalidBuffer(_)));
        assert_eq!(plane.state(), PlaneState::NeedsModeset);
        assert!(harness.device.take_calls().is_empty());
    }

    #[test]
    fn test_move_only_changes_logical_position() {
        let harness = Harness::new();
        let mut plane = harness.plane();

        assert!(plane.update());
        assert!(plane.move_to(1920, 0));

        assert_eq!(plane.view().geometry().x, 1920);
        assert!(harness.device.take_calls().is_empty());
    }

    #[test]
    fn test_finalize_restores_snapshot_after_many_frames() {
        let harness = Harness::new();
        let mut plane = harness.plane();
        let buffers = [gem_buffer(1), gem_buffer(2)];
        for i in 0..6 {
            plane.attach(&buffers[i % 2]).unwrap();
        }
        harness.device.take_calls();

        plane.finalize();

        assert_eq!(harness.device.take_calls(), vec![modeset(90)]);
        assert_eq!(plane.original_state(), None);
    }

    #[test]
    fn test_finalize_is_idempotent_and_drop_does_not_repeat_it() {
        let harness = Harness::new();
        let mut plane = harness.plane();

        plane.finalize();
        plane.finalize();
        drop(plane);

        assert_eq!(harness.device.count(|call| matches!(call, Call::SetCrtc { .. })), 1);
    }

    #[test]
    fn test_drop_restores_and_unregisters() {
        let harness = Harness::new();
        let plane = harness.plane();
        assert_eq!(harness.ctx.session.listener_count(), 1);
        assert!(harness.ctx.page_flips.is_registered(crtc(5)));

        drop(plane);

        assert_eq!(harness.device.take_calls(), vec![modeset(90)]);
        assert_eq!(harness.ctx.session.listener_count(), 0);
        assert!(!harness.ctx.page_flips.is_registered(crtc(5)));
    }

    #[test]
    fn test_restoring_disabled_crtc_passes_no_connectors() {
        let harness = Harness::new();
        *harness.device.crtc_state.borrow_mut() = Some(CrtcState {
            crtc: crtc(5),
            framebuffer: None,
            position: (0, 0),
            mode: None,
        });
        let mut plane = harness.plane();

        plane.finalize();

        assert_eq!(
            harness.device.take_calls(),
            vec![Call::SetCrtc {
                crtc: crtc(5),
                framebuffer: None,
                origin: (0, 0),
                connectors: vec![],
                mode: None,
            }]
        );
    }

    #[test]
    fn test_restore_failure_is_swallowed() {
        let harness = Harness::new();
        let mut plane = harness.plane();
        harness.device.fail_set_crtc.set(Some(Errno::EACCES));

        plane.finalize();

        assert_eq!(plane.original_state(), None);
    }

    #[test]
    fn test_deferred_frame_for_dropped_plane_is_harmless() {
        let harness = Harness::new();
        let mut plane = harness.plane();
        plane.attach(&gem_buffer(1)).unwrap();
        drop(plane);

        harness.scheduler.run_pending();
    }

    #[test]
    fn test_handle_page_flip_notifies_view() {
        let harness = Harness::new();
        let plane = harness.plane();
        let frames = Frames::default();
        plane.view().add_handler(frames.clone());

        plane.handle_page_flip(777);

        assert_eq!(*frames.0.borrow(), vec![777]);
    }
}
