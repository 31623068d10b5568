//! Recording `KmsDevice` fake for unit tests.

use std::cell::{Cell, RefCell};
use std::io;
use std::time::Duration;

use drm::control::{connector, crtc, framebuffer};
use nix::errno::Errno;
use novade_buffer_manager::{BufferFormat, ObjectKind, RenderBuffer};

use crate::device::{CrtcState, FramebufferDescriptor, KmsDevice, PageFlipCompletion, ScanoutMode};
use crate::event_bridge::IdleScheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestMode {
    pub width: u16,
    pub height: u16,
    pub refresh: u32,
    pub preferred: bool,
}

impl TestMode {
    pub const fn new(width: u16, height: u16, refresh: u32) -> Self {
        Self { width, height, refresh, preferred: false }
    }

    pub const fn preferred(mut self) -> Self {
        self.preferred = true;
        self
    }
}

impl ScanoutMode for TestMode {
    fn size(&self) -> (u16, u16) {
        (self.width, self.height)
    }

    fn vrefresh(&self) -> u32 {
        self.refresh
    }

    fn is_preferred(&self) -> bool {
        self.preferred
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    GetCrtc(crtc::Handle),
    SetCrtc {
        crtc: crtc::Handle,
        framebuffer: Option<framebuffer::Handle>,
        origin: (u32, u32),
        connectors: Vec<connector::Handle>,
        mode: Option<TestMode>,
    },
    PageFlip {
        crtc: crtc::Handle,
        framebuffer: framebuffer::Handle,
    },
    AddFramebuffer(FramebufferDescriptor),
    RemoveFramebuffer(framebuffer::Handle),
}

pub struct MockDevice {
    pub calls: RefCell<Vec<Call>>,
    pub crtc_state: RefCell<Option<CrtcState<TestMode>>>,
    pub fail_set_crtc: Cell<Option<Errno>>,
    pub fail_page_flip: Cell<Option<Errno>>,
    pub fail_add_framebuffer: Cell<Option<Errno>>,
    pub fail_remove_framebuffer: Cell<Option<Errno>>,
    next_framebuffer: Cell<u32>,
    pending_flips: RefCell<Vec<PageFlipCompletion>>,
    frame: Cell<u32>,
}

impl MockDevice {
    /// A device whose `crtc` currently scans out framebuffer 90 in `mode`.
    pub fn new(crtc: crtc::Handle, mode: TestMode) -> Self {
        Self {
            calls: RefCell::new(Vec::new()),
            crtc_state: RefCell::new(Some(CrtcState {
                crtc,
                framebuffer: Some(fb(90)),
                position: (0, 0),
                mode: Some(mode),
            })),
            fail_set_crtc: Cell::new(None),
            fail_page_flip: Cell::new(None),
            fail_add_framebuffer: Cell::new(None),
            fail_remove_framebuffer: Cell::new(None),
            next_framebuffer: Cell::new(100),
            pending_flips: RefCell::new(Vec::new()),
            frame: Cell::new(0),
        }
    }

    pub fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut *self.calls.borrow_mut())
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.borrow().iter().filter(|call| pred(call)).count()
    }

    fn record(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }
}

impl KmsDevice for MockDevice {
    type Mode = TestMode;

    fn crtc_state(&self, crtc: crtc::Handle) -> io::Result<CrtcState<TestMode>> {
        self.record(Call::GetCrtc(crtc));
        self.crtc_state
            .borrow()
            .clone()
            .ok_or_else(|| io::Error::from_raw_os_error(Errno::ENOENT as i32))
    }

    fn set_crtc(
        &self,
        crtc: crtc::Handle,
        framebuffer: Option<framebuffer::Handle>,
        origin: (u32, u32),
        connectors: &[connector::Handle],
        mode: Option<TestMode>,
    ) -> io::Result<()> {
        self.record(Call::SetCrtc {
            crtc,
            framebuffer,
            origin,
            connectors: connectors.to_vec(),
            mode,
        });
        match self.fail_set_crtc.get() {
            Some(errno) => Err(io::Error::from_raw_os_error(errno as i32)),
            None => Ok(()),
        }
    }

    fn page_flip(&self, crtc: crtc::Handle, framebuffer: framebuffer::Handle) -> io::Result<()> {
        self.record(Call::PageFlip { crtc, framebuffer });
        if let Some(errno) = self.fail_page_flip.get() {
            return Err(io::Error::from_raw_os_error(errno as i32));
        }
        let frame = self.frame.get() + 1;
        self.frame.set(frame);
        self.pending_flips.borrow_mut().push(PageFlipCompletion {
            crtc,
            frame,
            time: Duration::from_millis(16 * u64::from(frame)),
        });
        Ok(())
    }

    fn add_framebuffer(&self, descriptor: &FramebufferDescriptor) -> io::Result<framebuffer::Handle> {
        self.record(Call::AddFramebuffer(*descriptor));
        if let Some(errno) = self.fail_add_framebuffer.get() {
            return Err(io::Error::from_raw_os_error(errno as i32));
        }
        let id = self.next_framebuffer.get();
        self.next_framebuffer.set(id + 1);
        Ok(fb(id))
    }

    fn remove_framebuffer(&self, framebuffer: framebuffer::Handle) -> io::Result<()> {
        self.record(Call::RemoveFramebuffer(framebuffer));
        match self.fail_remove_framebuffer.get() {
            Some(errno) => Err(io::Error::from_raw_os_error(errno as i32)),
            None => Ok(()),
        }
    }

    fn page_flip_events(&self) -> io::Result<Vec<PageFlipCompletion>> {
        Ok(std::mem::take(&mut *self.pending_flips.borrow_mut()))
    }
}

pub fn crtc(id: u32) -> crtc::Handle {
    drm::control::from_u32(id).expect("non-zero crtc id")
}

pub fn connector(id: u32) -> connector::Handle {
    drm::control::from_u32(id).expect("non-zero connector id")
}

pub fn fb(id: u32) -> framebuffer::Handle {
    drm::control::from_u32(id).expect("non-zero framebuffer id")
}

/// A 1920x1080 buffer that exports `gem_handle` as its DRM memory handle.
pub fn gem_buffer(gem_handle: u32) -> RenderBuffer {
    let buffer = RenderBuffer::new(1920, 1080, 1920 * 4, BufferFormat::Xrgb8888);
    buffer
        .add_exporter(move |kind: ObjectKind| (kind == ObjectKind::DrmHandle).then_some(gem_handle))
        .expect("capability table allocation");
    buffer
}

/// `IdleScheduler` that queues tasks until the test runs them.
#[derive(Default)]
pub struct QueueScheduler {
    tasks: RefCell<Vec<Box<dyn FnOnce()>>>,
}

impl QueueScheduler {
    pub fn pending(&self) -> usize {
        self.tasks.borrow().len()
    }

    pub fn run_pending(&self) {
        let tasks = std::mem::take(&mut *self.tasks.borrow_mut());
        for task in tasks {
            task();
        }
    }
}

impl IdleScheduler for QueueScheduler {
    fn schedule_idle(&self, task: Box<dyn FnOnce()>) {
        self.tasks.borrow_mut().push(task);
    }
}
