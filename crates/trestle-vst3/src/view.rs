//! IPlugView implementation hosting a plugin editor.
//!
//! The view owns the editor-side bridge session (controller + editor) behind
//! a nullable slot that every COM entry point re-checks, so a host that
//! keeps calling after teardown gets `kNotInitialized` instead of a dangling
//! dereference. Outbound messages are drained from the controller only
//! after its borrow is released; hosts deliver connection-point messages
//! synchronously and the reply path re-enters this view.

use std::cell::{Cell, UnsafeCell};
use std::ffi::{c_void, CStr};

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
use std::rc::Rc;

use trestle_core::{Editor, UiController, UiDelegate};
use vst3::{Class, ComPtr, ComRef, Steinberg::Vst::*, Steinberg::*};

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
use vst3::ComWrapper;
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
use vst3::Steinberg::Linux::{IRunLoop, IRunLoopTrait, ITimerHandler};

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
use crate::timer::{IdleTimer, IDLE_INTERVAL_MS};
use crate::transport::{result_to_tresult, MessageEndpoint, Vst3Attributes};
use crate::util::{com_addref, com_release};

/// The live UI session, present between attached() and removed().
struct UiSession {
    controller: UiController,
    editor: Box<dyn Editor>,
}

/// Host run-loop timer registration.
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
struct RunLoopTimer {
    run_loop: ComPtr<IRunLoop>,
    handler: ComPtr<ITimerHandler>,
    valid: Rc<Cell<bool>>,
}

/// VST3 plug view bridging an embedded [`Editor`] to the processor over a
/// connection point.
pub struct BridgeView {
    host: ComPtr<IHostApplication>,
    parameter_offset: u32,
    program_count: u32,
    sample_rate: Cell<f64>,
    scale_factor: Cell<f32>,
    /// Editor parked here while no session is attached.
    editor_slot: UnsafeCell<Option<Box<dyn Editor>>>,
    session: UnsafeCell<Option<UiSession>>,
    peer: UnsafeCell<Option<ComPtr<IConnectionPoint>>>,
    frame: UnsafeCell<*mut IPlugFrame>,
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    timer: UnsafeCell<Option<RunLoopTimer>>,
}

// SAFETY: VST3 IPlugView methods are called from the UI thread only.
unsafe impl Send for BridgeView {}
// SAFETY: VST3 IPlugView methods are called from the UI thread only.
unsafe impl Sync for BridgeView {}

impl BridgeView {
    pub(crate) fn new(
        host: ComPtr<IHostApplication>,
        editor: Box<dyn Editor>,
        sample_rate: f64,
        parameter_offset: u32,
        program_count: u32,
    ) -> Self {
        Self {
            host,
            parameter_offset,
            program_count,
            sample_rate: Cell::new(sample_rate),
            scale_factor: Cell::new(0.0),
            editor_slot: UnsafeCell::new(Some(editor)),
            session: UnsafeCell::new(None),
            peer: UnsafeCell::new(None),
            frame: UnsafeCell::new(std::ptr::null_mut()),
            #[cfg(not(any(target_os = "macos", target_os = "windows")))]
            timer: UnsafeCell::new(None),
        }
    }

    fn current_size(&self) -> trestle_core::Size {
        // SAFETY: VST3 guarantees single-threaded access for IPlugView methods.
        let session = unsafe { &*self.session.get() };
        if let Some(s) = session.as_ref() {
            return s.editor.size();
        }
        // SAFETY: as above.
        let slot = unsafe { &*self.editor_slot.get() };
        slot.as_ref()
            .map(|e| e.size())
            .unwrap_or(trestle_core::Size::new(0, 0))
    }

    /// Connect the controller when both a session and a peer exist. The
    /// host may connect the endpoint before or after attaching the view.
    fn reconnect_if_needed(&self) {
        // SAFETY: VST3 guarantees single-threaded access.
        let has_peer = unsafe { &*self.peer.get() }.is_some();
        if !has_peer {
            return;
        }
        // SAFETY: as above.
        if let Some(s) = unsafe { &mut *self.session.get() }.as_mut() {
            if !s.controller.is_connected() {
                if let Err(err) = s.controller.connect() {
                    log::warn!("vst3: view connect failed: {err}");
                }
            }
        }
        self.drain_outbox();
    }

    /// Flush queued controller messages to the peer endpoint.
    ///
    /// The session borrow is released between popping and sending: a sent
    /// `idle` makes the processor reply synchronously, re-entering
    /// [`notify`](IConnectionPointTrait::notify) on this view.
    fn drain_outbox(&self) {
        // SAFETY: VST3 guarantees single-threaded access.
        let Some(peer) = unsafe { &*self.peer.get() }.clone() else {
            return;
        };
        let endpoint = MessageEndpoint::new(self.host.clone(), peer);
        loop {
            // SAFETY: as above; the borrow ends before the send below.
            let msg = match unsafe { &mut *self.session.get() }.as_mut() {
                Some(s) => s.controller.pop_outbound(),
                None => None,
            };
            let Some(msg) = msg else { break };
            if let Err(err) = endpoint.send(&msg) {
                log::warn!("vst3: failed to send '{}': {err}", msg.id());
                break;
            }
        }
    }

    /// Timer tick: pump the bridge and the editor, then forward whatever
    /// the editor produced.
    pub(crate) fn on_idle_timer(&self) {
        {
            // SAFETY: runs on the UI thread; released before drain_outbox.
            let session = unsafe { &mut *self.session.get() };
            let Some(s) = session.as_mut() else { return };
            s.controller.on_timer(&mut *s.editor as &mut dyn UiDelegate);
            for event in s.editor.take_events() {
                if let Err(err) = s.controller.apply_event(&event) {
                    log::warn!("vst3: dropped editor event: {err}");
                }
            }
        }
        self.drain_outbox();
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    fn register_run_loop_timer(&self) {
        // SAFETY: VST3 guarantees single-threaded access.
        let frame = unsafe { *self.frame.get() };
        if frame.is_null() {
            log::debug!("vst3: no IPlugFrame, idle timer not registered");
            return;
        }
        // SAFETY: frame is a valid COM pointer owned by this view.
        let Some(run_loop) = (unsafe { ComRef::from_raw(frame) }).and_then(|f| f.cast::<IRunLoop>())
        else {
            log::debug!("vst3: host frame has no IRunLoop");
            return;
        };

        let valid = Rc::new(Cell::new(true));
        let handler = ComWrapper::new(IdleTimer::new(self as *const Self, valid.clone()));
        let Some(handler) = handler.to_com_ptr::<ITimerHandler>() else {
            return;
        };
        // SAFETY: handler is a valid ITimerHandler for the registration.
        let res = unsafe { run_loop.registerTimer(handler.as_ptr(), IDLE_INTERVAL_MS) };
        if res != kResultOk {
            log::warn!("vst3: registerTimer failed ({res})");
            valid.set(false);
            return;
        }
        // SAFETY: single-threaded access.
        unsafe {
            *self.timer.get() = Some(RunLoopTimer {
                run_loop,
                handler,
                valid,
            });
        }
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    fn unregister_run_loop_timer(&self) {
        // SAFETY: VST3 guarantees single-threaded access.
        if let Some(timer) = unsafe { &mut *self.timer.get() }.take() {
            // The flag outlives our references: a host that leaked the
            // handler keeps firing into the guard, not into this view.
            timer.valid.set(false);
            // SAFETY: run_loop and handler are the registered pair.
            let res = unsafe { timer.run_loop.unregisterTimer(timer.handler.as_ptr()) };
            if res != kResultOk {
                log::warn!("vst3: unregisterTimer failed ({res})");
            }
        }
    }
}

impl Class for BridgeView {
    type Interfaces = (IPlugView, IConnectionPoint, IPlugViewContentScaleSupport);
}

#[allow(non_snake_case)]
impl IPlugViewTrait for BridgeView {
    unsafe fn isPlatformTypeSupported(&self, r#type: FIDString) -> tresult {
        if r#type.is_null() {
            return kResultFalse;
        }
        // SAFETY: the host provides a null-terminated C string.
        let type_str = unsafe { CStr::from_ptr(r#type) };

        #[cfg(target_os = "macos")]
        // SAFETY: kPlatformTypeNSView is a static null-terminated byte literal.
        let supported = type_str == unsafe { CStr::from_ptr(kPlatformTypeNSView) };

        #[cfg(target_os = "windows")]
        // SAFETY: kPlatformTypeHWND is a static null-terminated byte literal.
        let supported = type_str == unsafe { CStr::from_ptr(kPlatformTypeHWND) };

        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        // SAFETY: kPlatformTypeX11EmbedWindowID is a static null-terminated
        // byte literal.
        let supported = type_str == unsafe { CStr::from_ptr(kPlatformTypeX11EmbedWindowID) };

        if supported {
            kResultOk
        } else {
            kResultFalse
        }
    }

    unsafe fn attached(&self, parent: *mut c_void, r#type: FIDString) -> tresult {
        // SAFETY: r#type is forwarded from the host.
        if unsafe { self.isPlatformTypeSupported(r#type) } != kResultOk {
            return kResultFalse;
        }

        // SAFETY: VST3 guarantees single-threaded access for IPlugView methods.
        let session = unsafe { &mut *self.session.get() };
        if session.is_some() {
            return kResultFalse;
        }

        // SAFETY: as above.
        let Some(mut editor) = unsafe { &mut *self.editor_slot.get() }.take() else {
            log::error!("vst3: attached() without an editor");
            return kInternalError;
        };

        editor.open(parent as usize);
        editor.sample_rate_changed(self.sample_rate.get());
        let scale = self.scale_factor.get();
        if scale > 0.0 {
            editor.scale_factor_changed(scale);
        }

        *session = Some(UiSession {
            controller: UiController::new(self.parameter_offset, self.program_count),
            editor,
        });

        self.reconnect_if_needed();

        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        self.register_run_loop_timer();

        kResultOk
    }

    unsafe fn removed(&self) -> tresult {
        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        self.unregister_run_loop_timer();

        // SAFETY: VST3 guarantees single-threaded access for IPlugView methods.
        let Some(mut s) = unsafe { &mut *self.session.get() }.take() else {
            return kResultOk;
        };

        // Announce close before the transport goes away.
        s.controller.disconnect();
        // SAFETY: as above.
        if let Some(peer) = unsafe { &*self.peer.get() }.clone() {
            let endpoint = MessageEndpoint::new(self.host.clone(), peer);
            while let Some(msg) = s.controller.pop_outbound() {
                if endpoint.send(&msg).is_err() {
                    break;
                }
            }
        }

        s.editor.close();
        // Park the editor: hosts may re-attach the same view.
        // SAFETY: as above.
        unsafe { *self.editor_slot.get() = Some(s.editor) };
        kResultOk
    }

    unsafe fn onWheel(&self, _distance: f32) -> tresult {
        kResultFalse
    }

    unsafe fn onKeyDown(&self, _key: char16, _keyCode: int16, _modifiers: int16) -> tresult {
        kResultFalse
    }

    unsafe fn onKeyUp(&self, _key: char16, _keyCode: int16, _modifiers: int16) -> tresult {
        kResultFalse
    }

    unsafe fn getSize(&self, size: *mut ViewRect) -> tresult {
        if size.is_null() {
            return kInvalidArgument;
        }
        let current = self.current_size();
        // SAFETY: size is non-null (checked above) and host guarantees validity.
        let rect = unsafe { &mut *size };
        rect.left = 0;
        rect.top = 0;
        rect.right = current.width as i32;
        rect.bottom = current.height as i32;
        kResultOk
    }

    unsafe fn onSize(&self, newSize: *mut ViewRect) -> tresult {
        if newSize.is_null() {
            return kInvalidArgument;
        }
        // The view is fixed-size; accept the host echoing our own size and
        // reject everything else.
        // SAFETY: newSize is non-null (checked above).
        let rect = unsafe { &*newSize };
        let current = self.current_size();
        let width = (rect.right - rect.left).max(0) as u32;
        let height = (rect.bottom - rect.top).max(0) as u32;
        if width == current.width && height == current.height {
            kResultOk
        } else {
            kResultFalse
        }
    }

    unsafe fn onFocus(&self, _state: TBool) -> tresult {
        kResultOk
    }

    unsafe fn setFrame(&self, frame: *mut IPlugFrame) -> tresult {
        let frame_ptr = self.frame.get();
        // SAFETY: VST3 guarantees single-threaded access for IPlugView methods.
        let old_frame = unsafe { *frame_ptr };

        // SAFETY: old_frame is a valid COM object or null.
        unsafe { com_release(old_frame) };
        // SAFETY: frame is a valid COM object provided by the host, or null.
        unsafe { com_addref(frame) };

        // SAFETY: single-threaded access guaranteed by VST3.
        unsafe { *frame_ptr = frame };
        kResultOk
    }

    unsafe fn canResize(&self) -> tresult {
        kResultFalse
    }

    unsafe fn checkSizeConstraint(&self, rect: *mut ViewRect) -> tresult {
        if rect.is_null() {
            return kInvalidArgument;
        }
        let current = self.current_size();
        // SAFETY: rect is non-null (checked above).
        let r = unsafe { &mut *rect };
        r.right = r.left + current.width as i32;
        r.bottom = r.top + current.height as i32;
        kResultOk
    }
}

#[allow(non_snake_case)]
impl IConnectionPointTrait for BridgeView {
    unsafe fn connect(&self, other: *mut IConnectionPoint) -> tresult {
        // SAFETY: VST3 guarantees single-threaded access.
        let peer = unsafe { &mut *self.peer.get() };
        if peer.is_some() {
            log::warn!("vst3: view endpoint connected twice");
            return kInvalidArgument;
        }
        // SAFETY: other is a valid COM pointer or null.
        let Some(other) = (unsafe { ComRef::from_raw(other) }) else {
            return kInvalidArgument;
        };
        *peer = Some(other.to_com_ptr());

        self.reconnect_if_needed();
        kResultOk
    }

    unsafe fn disconnect(&self, other: *mut IConnectionPoint) -> tresult {
        if other.is_null() {
            return kInvalidArgument;
        }
        // SAFETY: VST3 guarantees single-threaded access.
        if unsafe { &*self.peer.get() }.is_none() {
            log::warn!("vst3: view endpoint disconnected while not connected");
            return kInvalidArgument;
        }

        // Flush a close while the transport still exists.
        // SAFETY: as above.
        if let Some(s) = unsafe { &mut *self.session.get() }.as_mut() {
            s.controller.disconnect();
        }
        self.drain_outbox();

        // SAFETY: as above.
        unsafe { *self.peer.get() = None };
        kResultOk
    }

    unsafe fn notify(&self, message: *mut IMessage) -> tresult {
        // SAFETY: message is a valid COM pointer or null.
        let Some(message) = (unsafe { ComRef::from_raw(message) }) else {
            return kInvalidArgument;
        };

        // SAFETY: the message id is a null-terminated string owned by the
        // message for the duration of this call.
        let id_ptr = unsafe { message.getMessageID() };
        if id_ptr.is_null() {
            return kInvalidArgument;
        }
        // SAFETY: as above.
        let Ok(id) = unsafe { CStr::from_ptr(id_ptr) }.to_str() else {
            return kInvalidArgument;
        };
        let id = id.to_owned();

        // SAFETY: the attribute list is owned by the message.
        let Some(attrs) = (unsafe { ComRef::from_raw(message.getAttributes()) }) else {
            return kInvalidArgument;
        };
        let attrs = Vst3Attributes::new(attrs);

        let result = {
            // SAFETY: VST3 guarantees single-threaded access; the borrow
            // ends before drain_outbox below.
            let session = unsafe { &mut *self.session.get() };
            let Some(s) = session.as_mut() else {
                log::warn!("vst3: message '{id}' after view teardown");
                return kNotInitialized;
            };
            s.controller
                .notify(&id, &attrs, &mut *s.editor as &mut dyn UiDelegate)
        };

        self.drain_outbox();
        result_to_tresult(result)
    }
}

#[allow(non_snake_case)]
impl IPlugViewContentScaleSupportTrait for BridgeView {
    unsafe fn setContentScaleFactor(&self, factor: f32) -> tresult {
        self.scale_factor.set(factor);
        // SAFETY: VST3 guarantees single-threaded access.
        if let Some(s) = unsafe { &mut *self.session.get() }.as_mut() {
            s.controller
                .set_content_scale_factor(factor, &mut *s.editor as &mut dyn UiDelegate);
        }
        kResultOk
    }
}

// Safety net in case removed() was not called by the host.
impl Drop for BridgeView {
    fn drop(&mut self) {
        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        if let Some(timer) = self.timer.get_mut().take() {
            timer.valid.set(false);
            // SAFETY: run_loop and handler are the registered pair.
            unsafe { timer.run_loop.unregisterTimer(timer.handler.as_ptr()) };
        }

        let frame = *self.frame.get_mut();
        // SAFETY: frame was AddRef'd in setFrame or is null.
        unsafe { com_release(frame) };

        if let Some(s) = self.session.get_mut().as_mut() {
            s.editor.close();
        }
    }
}
