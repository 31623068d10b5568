//! The view contract exposed to the scene manager.
//!
//! A scene manager drives a plane through [`ViewImpl`]: it calls
//! [`ViewImpl::attach`] once per committed frame and [`ViewImpl::move_to`] when
//! the output's logical position changes. Frame-presented notifications flow
//! back through the [`ViewHandler`]s registered on the plane's [`View`].

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use novade_buffer_manager::RenderBuffer;

use crate::error::Result;

/// Logical geometry of a view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Geometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Receives notifications about a view.
pub trait ViewHandler {
    /// A frame was presented at `time_msec` (`CLOCK_MONOTONIC`, milliseconds).
    fn frame(&mut self, _time_msec: u32) {}

    /// The view's logical position changed.
    fn moved(&mut self, _geometry: &Geometry) {}
}

/// Operations a scene manager performs on a view.
pub trait ViewImpl {
    /// Whether the view can accept a pending update.
    fn update(&mut self) -> bool;

    /// Presents `buffer` as the next frame.
    fn attach(&mut self, buffer: &RenderBuffer) -> Result<()>;

    /// Moves the view to a new logical position.
    fn move_to(&mut self, x: i32, y: i32) -> bool;

    fn view(&self) -> &View;
}

type HandlerList = RefCell<Vec<Box<dyn ViewHandler>>>;

/// Shared list of handlers registered on a view.
///
/// Cloning yields another reference to the same list. Notifications can be
/// delivered from event-loop callbacks that hold only a [`WeakViewHandlers`].
#[derive(Clone, Default)]
pub struct ViewHandlers {
    inner: Rc<HandlerList>,
}

impl ViewHandlers {
    pub fn add(&self, handler: impl ViewHandler + 'static) {
        self.inner.borrow_mut().push(Box::new(handler));
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn downgrade(&self) -> WeakViewHandlers {
        WeakViewHandlers {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Delivers a frame-presented notification to every handler.
    pub fn frame(&self, time_msec: u32) {
        self.dispatch(|handler| handler.frame(time_msec));
    }

    pub fn moved(&self, geometry: &Geometry) {
        self.dispatch(|handler| handler.moved(geometry));
    }

    fn dispatch(&self, mut notify: impl FnMut(&mut dyn ViewHandler)) {
        // Handlers registered during delivery only see the next notification.
        let mut active = std::mem::take(&mut *self.inner.borrow_mut());
        for handler in active.iter_mut() {
            notify(handler.as_mut());
        }
        let mut handlers = self.inner.borrow_mut();
        active.append(&mut handlers);
        *handlers = active;
    }
}

impl fmt::Debug for ViewHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewHandlers").field("len", &self.len()).finish()
    }
}

/// Non-owning reference to a view's handlers.
#[derive(Clone, Debug, Default)]
pub struct WeakViewHandlers {
    inner: Weak<HandlerList>,
}

impl WeakViewHandlers {
    pub fn upgrade(&self) -> Option<ViewHandlers> {
        self.inner.upgrade().map(|inner| ViewHandlers { inner })
    }

    /// Whether both references point at the same handler list.
    pub fn ptr_eq(&self, other: &WeakViewHandlers) -> bool {
        Weak::ptr_eq(&self.inner, &other.inner)
    }
}

/// A view: logical geometry plus the handlers interested in it.
#[derive(Debug, Default)]
pub struct View {
    geometry: Geometry,
    handlers: ViewHandlers,
}

impl View {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            geometry: Geometry { x: 0, y: 0, width, height },
            handlers: ViewHandlers::default(),
        }
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn handlers(&self) -> &ViewHandlers {
        &self.handlers
    }

    pub fn add_handler(&self, handler: impl ViewHandler + 'static) {
        self.handlers.add(handler);
    }

    /// Updates the logical position, notifying handlers only on change.
    pub fn set_position(&mut self, x: i32, y: i32) {
        if self.geometry.x == x && self.geometry.y == y {
            return;
        }
        self.geometry.x = x;
        self.geometry.y = y;
        self.handlers.moved(&self.geometry);
    }

    pub fn frame(&self, time_msec: u32) {
        self.handlers.frame(time_msec);
    }
}
