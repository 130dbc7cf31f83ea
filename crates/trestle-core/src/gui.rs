//! Editor embedding traits.

use crate::bridge::{UiDelegate, UiEvent};

/// A fixed editor size in logical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// A plugin editor embedded into a host-provided parent window.
///
/// The view wrapper drives this trait from the UI thread: `open` on attach,
/// `close` on removal, and [`UiDelegate`] callbacks plus
/// [`take_events`](Editor::take_events) on every idle tick.
pub trait Editor: UiDelegate + Send {
    /// Attach to the host's parent window. `parent` is the platform window
    /// id (X11 window, HWND, NSView pointer).
    fn open(&mut self, parent: usize);

    /// Detach from the parent window.
    fn close(&mut self);

    /// Fixed editor size.
    fn size(&self) -> Size;

    /// Drain actions the editor produced since the last tick.
    fn take_events(&mut self) -> Vec<UiEvent> {
        Vec::new()
    }
}
