//! Message transport over IMessage/IAttributeList.
//!
//! Outbound [`Message`]s are materialized as host-allocated IMessage
//! objects (via IHostApplication::createInstance) and pushed through the
//! peer IConnectionPoint. Inbound attribute lists are read through
//! [`Vst3Attributes`], which adapts them to the core
//! [`AttributeSource`] trait so dispatch logic stays in `trestle-core`.

use std::ffi::{c_void, CString};

use trestle_core::{AttributeSource, BridgeError, BridgeResult, Message, Value};
use vst3::Interface;
use vst3::{ComPtr, ComRef, Steinberg::Vst::*, Steinberg::*};

/// Map a bridge error onto the equivalent VST3 result code.
pub(crate) fn error_to_tresult(err: BridgeError) -> tresult {
    match err {
        BridgeError::NotInitialized => kNotInitialized,
        BridgeError::InvalidArgument => kInvalidArgument,
        BridgeError::NotImplemented => kNotImplemented,
        BridgeError::InternalError => kInternalError,
        BridgeError::OutOfMemory => kOutOfMemory,
    }
}

pub(crate) fn result_to_tresult(result: BridgeResult<()>) -> tresult {
    match result {
        Ok(()) => kResultOk,
        Err(err) => error_to_tresult(err),
    }
}

/// Attribute reads over a live host attribute list.
pub(crate) struct Vst3Attributes<'a> {
    list: ComRef<'a, IAttributeList>,
}

impl<'a> Vst3Attributes<'a> {
    pub fn new(list: ComRef<'a, IAttributeList>) -> Self {
        Self { list }
    }

    fn key(key: &str) -> BridgeResult<CString> {
        CString::new(key).map_err(|_| BridgeError::InvalidArgument)
    }
}

impl AttributeSource for Vst3Attributes<'_> {
    fn int(&self, key: &str) -> BridgeResult<i64> {
        let key = Self::key(key)?;
        let mut value: i64 = 0;
        // SAFETY: key is a valid null-terminated string and value outlives
        // the call.
        let res = unsafe { self.list.getInt(key.as_ptr(), &mut value) };
        if res == kResultOk {
            Ok(value)
        } else {
            Err(BridgeError::InvalidArgument)
        }
    }

    fn float(&self, key: &str) -> BridgeResult<f64> {
        let key = Self::key(key)?;
        let mut value: f64 = 0.0;
        // SAFETY: key is a valid null-terminated string and value outlives
        // the call.
        let res = unsafe { self.list.getFloat(key.as_ptr(), &mut value) };
        if res == kResultOk {
            Ok(value)
        } else {
            Err(BridgeError::InvalidArgument)
        }
    }

    fn string(&self, key: &str, max_units: usize) -> BridgeResult<Vec<u16>> {
        let key = Self::key(key)?;
        // One extra unit for the terminator the host writes.
        let mut buf = vec![0 as TChar; max_units + 1];
        let size_bytes = (buf.len() * std::mem::size_of::<TChar>()) as u32;
        // SAFETY: buf is writable for size_bytes bytes.
        let res = unsafe { self.list.getString(key.as_ptr(), buf.as_mut_ptr(), size_bytes) };
        if res != kResultOk {
            return Err(BridgeError::InvalidArgument);
        }
        buf.truncate(max_units);
        Ok(buf.into_iter().map(|u| u as u16).collect())
    }

    fn binary(&self, key: &str) -> BridgeResult<Vec<u8>> {
        let key = Self::key(key)?;
        let mut data: *const c_void = std::ptr::null();
        let mut size: u32 = 0;
        // SAFETY: data/size are valid out-pointers; the host owns the
        // returned buffer for the duration of the call.
        let res = unsafe { self.list.getBinary(key.as_ptr(), &mut data, &mut size) };
        if res != kResultOk || data.is_null() {
            return Err(BridgeError::InvalidArgument);
        }
        // SAFETY: the host guarantees data points to size readable bytes.
        let slice = unsafe { std::slice::from_raw_parts(data as *const u8, size as usize) };
        Ok(slice.to_vec())
    }
}

/// Write every attribute of `msg` into a host attribute list.
fn write_attributes(list: ComRef<'_, IAttributeList>, msg: &Message) -> BridgeResult<()> {
    for (key, value) in msg.attributes() {
        let key = CString::new(key.as_str()).map_err(|_| BridgeError::InvalidArgument)?;
        let res = match value {
            // SAFETY: key is null-terminated; scalar writes copy the value.
            Value::Int(v) => unsafe { list.setInt(key.as_ptr(), *v) },
            // SAFETY: as above.
            Value::Float(v) => unsafe { list.setFloat(key.as_ptr(), *v) },
            Value::String(units) => {
                let mut wide: Vec<TChar> = units.iter().map(|&u| u as TChar).collect();
                wide.push(0);
                // SAFETY: wide is null-terminated; setString copies it.
                unsafe { list.setString(key.as_ptr(), wide.as_ptr()) }
            }
            Value::Binary(bytes) => {
                // SAFETY: bytes is readable for its length; setBinary copies.
                unsafe {
                    list.setBinary(key.as_ptr(), bytes.as_ptr() as *const c_void, bytes.len() as u32)
                }
            }
        };
        if res != kResultOk {
            return Err(BridgeError::OutOfMemory);
        }
    }
    Ok(())
}

/// One direction of a connected message channel: allocates messages from
/// the host and notifies the peer endpoint.
pub(crate) struct MessageEndpoint {
    host: ComPtr<IHostApplication>,
    peer: ComPtr<IConnectionPoint>,
}

impl MessageEndpoint {
    pub fn new(host: ComPtr<IHostApplication>, peer: ComPtr<IConnectionPoint>) -> Self {
        Self { host, peer }
    }

    /// Send one message. Delivery is fire-and-forget: the peer's dispatch
    /// result is logged, not propagated.
    pub fn send(&self, msg: &Message) -> BridgeResult<()> {
        let id = CString::new(msg.id()).map_err(|_| BridgeError::InvalidArgument)?;

        let mut cid = IMessage::IID;
        let mut iid = IMessage::IID;
        let mut obj: *mut c_void = std::ptr::null_mut();
        // SAFETY: cid/iid/obj are valid out-pointers for the duration of
        // the call.
        let res = unsafe {
            self.host.createInstance(
                &mut cid as *mut _ as *mut TUID,
                &mut iid as *mut _ as *mut TUID,
                &mut obj,
            )
        };
        if res != kResultOk || obj.is_null() {
            log::warn!("vst3: host failed to allocate IMessage ({res})");
            return Err(BridgeError::OutOfMemory);
        }

        // SAFETY: createInstance returned an owned IMessage reference.
        let message = unsafe { ComPtr::<IMessage>::from_raw(obj as *mut IMessage) }
            .ok_or(BridgeError::OutOfMemory)?;

        // SAFETY: id is a valid null-terminated string; the message copies it.
        unsafe { message.setMessageID(id.as_ptr()) };

        // SAFETY: getAttributes returns a list owned by the message, valid
        // while `message` is alive.
        let attrs = unsafe { ComRef::from_raw(message.getAttributes()) }
            .ok_or(BridgeError::OutOfMemory)?;
        write_attributes(attrs, msg)?;

        // SAFETY: message is a valid IMessage for the duration of the call.
        let res = unsafe { self.peer.notify(message.as_ptr()) };
        if res != kResultOk {
            log::debug!("vst3: peer rejected '{}' ({res})", msg.id());
        }
        Ok(())
    }
}
