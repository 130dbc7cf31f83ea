//! Editor-side bridge controller.
//!
//! [`UiController`] owns the editor's half of the message protocol: it turns
//! inbound messages into [`UiDelegate`] callbacks and editor actions into
//! outbound [`Message`]s.
//!
//! The controller is sans-io. Outbound messages are queued on an internal
//! FIFO and drained by the transport with [`UiController::pop_outbound`]
//! after the call that produced them returns. Delivery of a message can
//! therefore never re-enter the controller while it is borrowed, which
//! matters because hosts dispatch connection-point messages synchronously.

use std::collections::VecDeque;

use crate::error::{BridgeError, BridgeResult};
use crate::message::{
    attr, id, narrow_utf16, AttributeSource, Message, TARGET_PROCESSOR,
};

/// Maximum accepted length for one side of a state-set pair, in UTF-16
/// code units. Guards the allocation made for inbound strings.
const MAX_STATE_UNITS: i64 = 64 * 1024;

/// Callbacks into the embedding UI.
///
/// All methods run on the UI thread.
pub trait UiDelegate {
    /// A parameter value changed on the processor side. `index` is already
    /// offset-corrected.
    fn parameter_changed(&mut self, index: u32, value: f32);

    /// The processor loaded a program.
    fn program_loaded(&mut self, index: u32) {
        let _ = index;
    }

    /// A key/value state pair changed on the processor side.
    fn state_changed(&mut self, key: &str, value: &str) {
        let (_, _) = (key, value);
    }

    /// The processor's sample rate changed.
    fn sample_rate_changed(&mut self, sample_rate: f64);

    /// The host reported a new content scale factor.
    fn scale_factor_changed(&mut self, factor: f32) {
        let _ = factor;
    }

    /// Periodic idle tick; pump the toolkit here.
    fn idle(&mut self) {}
}

/// An action originated by the editor, to be forwarded to the processor.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    EditParameter { index: u32, started: bool },
    SetParameterValue { index: u32, value: f32 },
    SendNote { channel: u8, note: u8, velocity: u8 },
    SetState { key: String, value: String },
}

/// Single-slot mailbox for the processor's `ready` signal.
///
/// The protocol allows at most one outstanding `ready` between two `idle`
/// requests. A duplicate arm is rejected, leaving the slot armed.
#[derive(Debug, Default)]
pub struct ReadySlot {
    armed: bool,
}

impl ReadySlot {
    /// Arm the slot. Fails with [`BridgeError::InternalError`] if it is
    /// already armed.
    pub fn arm(&mut self) -> BridgeResult<()> {
        if self.armed {
            return Err(BridgeError::InternalError);
        }
        self.armed = true;
        Ok(())
    }

    /// Drain the slot, returning whether it was armed.
    pub fn take(&mut self) -> bool {
        std::mem::take(&mut self.armed)
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }
}

/// Editor-side protocol state machine.
pub struct UiController {
    connected: bool,
    ready: ReadySlot,
    parameter_offset: u32,
    program_count: u32,
    scale_factor: f32,
    outbox: VecDeque<Message>,
}

impl UiController {
    /// `parameter_offset` is the number of raw indices reserved ahead of
    /// the plugin's own parameters (the program slot, when programs exist).
    pub fn new(parameter_offset: u32, program_count: u32) -> Self {
        Self {
            connected: false,
            ready: ReadySlot::default(),
            parameter_offset,
            program_count,
            scale_factor: 0.0,
            outbox: VecDeque::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Register the processor endpoint and queue the `init` handshake.
    ///
    /// Connecting twice without an intervening [`disconnect`](Self::disconnect)
    /// violates the endpoint contract.
    pub fn connect(&mut self) -> BridgeResult<()> {
        if self.connected {
            log::warn!("bridge: connect() while already connected");
            return Err(BridgeError::InvalidArgument);
        }
        self.connected = true;
        self.queue(Message::new(id::INIT));
        Ok(())
    }

    /// Drop the processor endpoint, announcing `close` first.
    pub fn disconnect(&mut self) {
        if !self.connected {
            return;
        }
        self.queue(Message::new(id::CLOSE));
        self.connected = false;
        self.ready.take();
    }

    /// Dispatch one inbound message to the delegate.
    pub fn notify<A, D>(&mut self, msg_id: &str, attrs: &A, delegate: &mut D) -> BridgeResult<()>
    where
        A: AttributeSource + ?Sized,
        D: UiDelegate + ?Sized,
    {
        match msg_id {
            id::READY => self.ready.arm().map_err(|err| {
                log::warn!("bridge: duplicate ready without intervening idle");
                err
            }),
            id::PARAMETER_SET => self.notify_parameter_set(attrs, delegate),
            id::STATE_SET => self.notify_state_set(attrs, delegate),
            id::SAMPLE_RATE => {
                let value = attrs.float(attr::VALUE)?;
                if value <= 0.0 {
                    return Err(BridgeError::InvalidArgument);
                }
                delegate.sample_rate_changed(value);
                Ok(())
            }
            other => {
                log::warn!("bridge: unsupported message '{other}'");
                Err(BridgeError::NotImplemented)
            }
        }
    }

    fn notify_parameter_set<A, D>(&mut self, attrs: &A, delegate: &mut D) -> BridgeResult<()>
    where
        A: AttributeSource + ?Sized,
        D: UiDelegate + ?Sized,
    {
        let rindex = attrs.int(attr::RINDEX)?;
        let value = attrs.float(attr::VALUE)?;

        if self.program_count > 0 && rindex == 0 {
            if value < 0.0 {
                return Err(BridgeError::InternalError);
            }
            delegate.program_loaded((value + 0.5) as u32);
            return Ok(());
        }

        let index = rindex - i64::from(self.parameter_offset);
        if index < 0 {
            return Err(BridgeError::InternalError);
        }
        delegate.parameter_changed(index as u32, value as f32);
        Ok(())
    }

    fn notify_state_set<A, D>(&mut self, attrs: &A, delegate: &mut D) -> BridgeResult<()>
    where
        A: AttributeSource + ?Sized,
        D: UiDelegate + ?Sized,
    {
        let key_len = attrs.int(attr::KEY_LENGTH)?;
        let value_len = attrs.int(attr::VALUE_LENGTH)?;
        if key_len < 0 || value_len < 0 {
            return Err(BridgeError::InternalError);
        }
        if key_len > MAX_STATE_UNITS || value_len > MAX_STATE_UNITS {
            return Err(BridgeError::OutOfMemory);
        }

        let key = attrs.string(attr::KEY, key_len as usize)?;
        let value = attrs.string(attr::VALUE, value_len as usize)?;
        delegate.state_changed(&narrow_utf16(&key), &narrow_utf16(&value));
        Ok(())
    }

    /// Periodic tick. Requests more data when the processor signalled
    /// `ready`, then lets the toolkit idle.
    pub fn on_timer<D: UiDelegate + ?Sized>(&mut self, delegate: &mut D) {
        if self.ready.take() {
            self.queue(Message::new(id::IDLE));
        }
        delegate.idle();
    }

    /// Begin or end a parameter edit gesture.
    pub fn edit_parameter(&mut self, index: u32, started: bool) -> BridgeResult<()> {
        self.check_connected()?;
        let mut msg = Message::new(id::PARAMETER_EDIT);
        msg.set_int(attr::RINDEX, self.raw_index(index))
            .set_int(attr::STARTED, i64::from(started));
        self.queue(msg);
        Ok(())
    }

    /// Send a plain parameter value to the processor.
    pub fn set_parameter_value(&mut self, index: u32, value: f32) -> BridgeResult<()> {
        self.check_connected()?;
        let mut msg = Message::new(id::PARAMETER_SET);
        msg.set_int(attr::RINDEX, self.raw_index(index))
            .set_float(attr::VALUE, f64::from(value));
        self.queue(msg);
        Ok(())
    }

    /// Send a note-on (velocity > 0) or note-off event.
    pub fn send_note(&mut self, channel: u8, note: u8, velocity: u8) -> BridgeResult<()> {
        self.check_connected()?;
        let status = if velocity > 0 { 0x90 } else { 0x80 } | (channel & 0x0f);
        let mut msg = Message::new(id::MIDI);
        msg.set_binary(attr::DATA, &[status, note & 0x7f, velocity & 0x7f]);
        self.queue(msg);
        Ok(())
    }

    /// Send a key/value state pair to the processor.
    pub fn set_state(&mut self, key: &str, value: &str) -> BridgeResult<()> {
        self.check_connected()?;
        let mut msg = Message::new(id::STATE_SET);
        msg.set_int(attr::KEY_LENGTH, key.encode_utf16().count() as i64)
            .set_int(attr::VALUE_LENGTH, value.encode_utf16().count() as i64)
            .set_string(attr::KEY, key)
            .set_string(attr::VALUE, value);
        self.queue(msg);
        Ok(())
    }

    /// Forward a host content scale change, ignoring no-op repeats.
    pub fn set_content_scale_factor<D: UiDelegate + ?Sized>(
        &mut self,
        factor: f32,
        delegate: &mut D,
    ) {
        if (self.scale_factor - factor).abs() < f32::EPSILON {
            return;
        }
        self.scale_factor = factor;
        delegate.scale_factor_changed(factor);
    }

    /// Apply an editor-originated event.
    pub fn apply_event(&mut self, event: &UiEvent) -> BridgeResult<()> {
        match event {
            UiEvent::EditParameter { index, started } => self.edit_parameter(*index, *started),
            UiEvent::SetParameterValue { index, value } => {
                self.set_parameter_value(*index, *value)
            }
            UiEvent::SendNote {
                channel,
                note,
                velocity,
            } => self.send_note(*channel, *note, *velocity),
            UiEvent::SetState { key, value } => self.set_state(key, value),
        }
    }

    /// Drain the next queued outbound message.
    pub fn pop_outbound(&mut self) -> Option<Message> {
        self.outbox.pop_front()
    }

    fn check_connected(&self) -> BridgeResult<()> {
        if self.connected {
            Ok(())
        } else {
            log::warn!("bridge: outbound message while disconnected");
            Err(BridgeError::NotInitialized)
        }
    }

    fn raw_index(&self, index: u32) -> i64 {
        i64::from(self.parameter_offset) + i64::from(index)
    }

    fn queue(&mut self, mut msg: Message) {
        msg.set_int(attr::TARGET, TARGET_PROCESSOR);
        self.outbox.push_back(msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Value;

    #[derive(Default)]
    struct RecordingDelegate {
        parameters: Vec<(u32, f32)>,
        programs: Vec<u32>,
        states: Vec<(String, String)>,
        sample_rates: Vec<f64>,
        scale_factors: Vec<f32>,
        idles: u32,
    }

    impl UiDelegate for RecordingDelegate {
        fn parameter_changed(&mut self, index: u32, value: f32) {
            self.parameters.push((index, value));
        }
        fn program_loaded(&mut self, index: u32) {
            self.programs.push(index);
        }
        fn state_changed(&mut self, key: &str, value: &str) {
            self.states.push((key.to_owned(), value.to_owned()));
        }
        fn sample_rate_changed(&mut self, sample_rate: f64) {
            self.sample_rates.push(sample_rate);
        }
        fn scale_factor_changed(&mut self, factor: f32) {
            self.scale_factors.push(factor);
        }
        fn idle(&mut self) {
            self.idles += 1;
        }
    }

    fn connected_controller(offset: u32, programs: u32) -> UiController {
        let mut c = UiController::new(offset, programs);
        c.connect().unwrap();
        c.pop_outbound().unwrap(); // init
        c
    }

    fn ready_message() -> Message {
        Message::new(id::READY)
    }

    #[test]
    fn test_connect_queues_init_with_target() {
        let mut c = UiController::new(1, 1);
        c.connect().unwrap();
        let msg = c.pop_outbound().unwrap();
        assert_eq!(msg.id(), id::INIT);
        assert_eq!(msg.int(attr::TARGET), Ok(TARGET_PROCESSOR));
    }

    #[test]
    fn test_double_connect_is_invalid_argument() {
        let mut c = connected_controller(1, 1);
        assert_eq!(c.connect(), Err(BridgeError::InvalidArgument));
    }

    #[test]
    fn test_disconnect_queues_close_and_is_idempotent() {
        let mut c = connected_controller(1, 1);
        c.disconnect();
        assert_eq!(c.pop_outbound().unwrap().id(), id::CLOSE);
        c.disconnect();
        assert!(c.pop_outbound().is_none());
    }

    #[test]
    fn test_outbound_while_disconnected_is_not_initialized() {
        let mut c = UiController::new(1, 0);
        assert_eq!(
            c.set_parameter_value(0, 1.0),
            Err(BridgeError::NotInitialized)
        );
        assert_eq!(c.edit_parameter(0, true), Err(BridgeError::NotInitialized));
    }

    #[test]
    fn test_ready_idle_alternation() {
        let mut c = connected_controller(1, 0);
        let mut d = RecordingDelegate::default();

        c.notify(id::READY, &ready_message(), &mut d).unwrap();
        c.on_timer(&mut d);
        assert_eq!(c.pop_outbound().unwrap().id(), id::IDLE);

        // No new ready: the next tick idles the toolkit but sends nothing.
        c.on_timer(&mut d);
        assert!(c.pop_outbound().is_none());
        assert_eq!(d.idles, 2);
    }

    #[test]
    fn test_duplicate_ready_is_internal_error() {
        let mut c = connected_controller(1, 0);
        let mut d = RecordingDelegate::default();

        c.notify(id::READY, &ready_message(), &mut d).unwrap();
        assert_eq!(
            c.notify(id::READY, &ready_message(), &mut d),
            Err(BridgeError::InternalError)
        );
        // The slot stays armed; the next tick still requests data.
        c.on_timer(&mut d);
        assert_eq!(c.pop_outbound().unwrap().id(), id::IDLE);
    }

    #[test]
    fn test_parameter_set_applies_offset() {
        let mut c = connected_controller(1, 1);
        let mut d = RecordingDelegate::default();

        let mut msg = Message::new(id::PARAMETER_SET);
        msg.set_int(attr::RINDEX, 3).set_float(attr::VALUE, 0.25);
        c.notify(id::PARAMETER_SET, &msg, &mut d).unwrap();
        assert_eq!(d.parameters, vec![(2, 0.25)]);
    }

    #[test]
    fn test_parameter_set_rindex_zero_selects_program() {
        let mut c = connected_controller(1, 2);
        let mut d = RecordingDelegate::default();

        let mut msg = Message::new(id::PARAMETER_SET);
        msg.set_int(attr::RINDEX, 0).set_float(attr::VALUE, 1.0);
        c.notify(id::PARAMETER_SET, &msg, &mut d).unwrap();
        assert_eq!(d.programs, vec![1]);

        let mut msg = Message::new(id::PARAMETER_SET);
        msg.set_int(attr::RINDEX, 0).set_float(attr::VALUE, -1.0);
        assert_eq!(
            c.notify(id::PARAMETER_SET, &msg, &mut d),
            Err(BridgeError::InternalError)
        );
    }

    #[test]
    fn test_parameter_set_below_offset_is_internal_error() {
        // No programs: raw index 0 is below a nonzero offset.
        let mut c = connected_controller(1, 0);
        let mut d = RecordingDelegate::default();

        let mut msg = Message::new(id::PARAMETER_SET);
        msg.set_int(attr::RINDEX, 0).set_float(attr::VALUE, 0.5);
        assert_eq!(
            c.notify(id::PARAMETER_SET, &msg, &mut d),
            Err(BridgeError::InternalError)
        );
    }

    #[test]
    fn test_state_set_narrows_utf16() {
        let mut c = connected_controller(1, 0);
        let mut d = RecordingDelegate::default();

        let mut msg = Message::new(id::STATE_SET);
        msg.set_int(attr::KEY_LENGTH, 4)
            .set_int(attr::VALUE_LENGTH, 7)
            .set_string(attr::KEY, "mode")
            .set_string(attr::VALUE, "stereo!");
        c.notify(id::STATE_SET, &msg, &mut d).unwrap();
        assert_eq!(d.states, vec![("mode".into(), "stereo!".into())]);
    }

    #[test]
    fn test_state_set_negative_length_is_internal_error() {
        let mut c = connected_controller(1, 0);
        let mut d = RecordingDelegate::default();

        let mut msg = Message::new(id::STATE_SET);
        msg.set_int(attr::KEY_LENGTH, -1)
            .set_int(attr::VALUE_LENGTH, 2)
            .set_string(attr::KEY, "k")
            .set_string(attr::VALUE, "vv");
        assert_eq!(
            c.notify(id::STATE_SET, &msg, &mut d),
            Err(BridgeError::InternalError)
        );
    }

    #[test]
    fn test_sample_rate_must_be_positive() {
        let mut c = connected_controller(1, 0);
        let mut d = RecordingDelegate::default();

        let mut msg = Message::new(id::SAMPLE_RATE);
        msg.set_float(attr::VALUE, 48000.0);
        c.notify(id::SAMPLE_RATE, &msg, &mut d).unwrap();
        assert_eq!(d.sample_rates, vec![48000.0]);

        let mut msg = Message::new(id::SAMPLE_RATE);
        msg.set_float(attr::VALUE, 0.0);
        assert_eq!(
            c.notify(id::SAMPLE_RATE, &msg, &mut d),
            Err(BridgeError::InvalidArgument)
        );
    }

    #[test]
    fn test_unknown_message_is_not_implemented() {
        let mut c = connected_controller(1, 0);
        let mut d = RecordingDelegate::default();
        assert_eq!(
            c.notify("bogus", &Message::new("bogus"), &mut d),
            Err(BridgeError::NotImplemented)
        );
    }

    #[test]
    fn test_send_note_builds_status_byte() {
        let mut c = connected_controller(1, 0);

        c.send_note(2, 60, 100).unwrap();
        let on = c.pop_outbound().unwrap();
        assert_eq!(on.binary(attr::DATA), Ok(vec![0x92, 60, 100]));

        c.send_note(2, 60, 0).unwrap();
        let off = c.pop_outbound().unwrap();
        assert_eq!(off.binary(attr::DATA), Ok(vec![0x82, 60, 0]));
    }

    #[test]
    fn test_set_state_carries_lengths() {
        let mut c = connected_controller(1, 0);
        c.set_state("key", "value").unwrap();
        let msg = c.pop_outbound().unwrap();
        assert_eq!(msg.int(attr::KEY_LENGTH), Ok(3));
        assert_eq!(msg.int(attr::VALUE_LENGTH), Ok(5));
        assert_eq!(
            msg.string(attr::KEY, 3),
            Ok("key".encode_utf16().collect::<Vec<_>>())
        );
    }

    #[test]
    fn test_scale_factor_change_is_tolerant() {
        let mut c = connected_controller(1, 0);
        let mut d = RecordingDelegate::default();

        c.set_content_scale_factor(1.5, &mut d);
        c.set_content_scale_factor(1.5, &mut d);
        c.set_content_scale_factor(2.0, &mut d);
        assert_eq!(d.scale_factors, vec![1.5, 2.0]);
    }

    #[test]
    fn test_apply_event_routes_to_outbound_ops() {
        let mut c = connected_controller(1, 0);
        c.apply_event(&UiEvent::EditParameter {
            index: 1,
            started: true,
        })
        .unwrap();
        let msg = c.pop_outbound().unwrap();
        assert_eq!(msg.id(), id::PARAMETER_EDIT);
        assert_eq!(msg.int(attr::RINDEX), Ok(2));
        assert_eq!(msg.int(attr::STARTED), Ok(1));

        c.apply_event(&UiEvent::SetParameterValue {
            index: 0,
            value: 440.0,
        })
        .unwrap();
        let msg = c.pop_outbound().unwrap();
        assert_eq!(msg.id(), id::PARAMETER_SET);
        assert_eq!(msg.int(attr::RINDEX), Ok(1));
        match msg.attributes().iter().find(|(k, _)| k == attr::VALUE) {
            Some((_, Value::Float(v))) => assert!((v - 440.0).abs() < 1e-9),
            other => panic!("missing value attribute: {other:?}"),
        }
    }
}
