//! Processor-side bridge.
//!
//! [`PluginBridge`] is the processor's half of the protocol. It answers the
//! editor's `init`/`idle` polls with queued data followed by `ready`, and
//! applies editor-originated changes to the [`Plugin`].
//!
//! Like the editor side, it is sans-io: replies land on an internal FIFO
//! drained with [`PluginBridge::pop_outbound`].

use std::collections::VecDeque;

use crate::error::{BridgeError, BridgeResult};
use crate::message::{
    attr, id, narrow_utf16, AttributeSource, Message, TARGET_EDITOR, TARGET_PROCESSOR,
};
use crate::plugin::Plugin;

/// Maximum accepted length for one side of a state-set pair, in UTF-16
/// code units.
const MAX_STATE_UNITS: i64 = 64 * 1024;

/// Host-facing side effects of editor messages.
///
/// The VST3 wrapper forwards these to IComponentHandler so edits from the
/// editor reach host automation.
pub trait HostDelegate {
    /// An edit gesture started on a parameter.
    fn edit_started(&mut self, index: u32) {
        let _ = index;
    }

    /// An edit gesture ended on a parameter.
    fn edit_ended(&mut self, index: u32) {
        let _ = index;
    }

    /// The editor changed a parameter value (already applied to the plugin).
    fn parameter_performed(&mut self, index: u32, value: f32) {
        let (_, _) = (index, value);
    }

    /// The editor sent a note event.
    fn note_received(&mut self, channel: u8, note: u8, velocity: u8) {
        let (_, _, _) = (channel, note, velocity);
    }
}

/// No-op delegate for plugins without host automation forwarding.
pub struct NullHostDelegate;

impl HostDelegate for NullHostDelegate {}

/// Processor-side protocol state machine.
pub struct PluginBridge {
    connected: bool,
    parameter_offset: u32,
    program_count: u32,
    dirty: Vec<bool>,
    outbox: VecDeque<Message>,
}

impl PluginBridge {
    pub fn new(parameter_count: usize, parameter_offset: u32, program_count: u32) -> Self {
        Self {
            connected: false,
            parameter_offset,
            program_count,
            dirty: vec![false; parameter_count],
            outbox: VecDeque::new(),
        }
    }

    /// Whether an editor completed the `init` handshake.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Mark a parameter so its value is included in the next `idle` flush.
    /// Used when host automation or state restore changes values behind the
    /// editor's back.
    pub fn queue_parameter(&mut self, index: u32) {
        if let Some(flag) = self.dirty.get_mut(index as usize) {
            *flag = true;
        }
    }

    /// Push the current sample rate to the editor, if one is connected.
    pub fn queue_sample_rate(&mut self, sample_rate: f64) {
        if !self.connected || sample_rate <= 0.0 {
            return;
        }
        let mut msg = Message::new(id::SAMPLE_RATE);
        msg.set_float(attr::VALUE, sample_rate);
        self.outbox.push_back(msg);
    }

    /// Dispatch one inbound editor message.
    pub fn handle<A, P, H>(
        &mut self,
        msg_id: &str,
        attrs: &A,
        plugin: &mut P,
        host: &mut H,
    ) -> BridgeResult<()>
    where
        A: AttributeSource + ?Sized,
        P: Plugin,
        H: HostDelegate + ?Sized,
    {
        if attrs.int(attr::TARGET)? != TARGET_PROCESSOR {
            return Err(BridgeError::InvalidArgument);
        }

        match msg_id {
            id::INIT => {
                self.connected = true;
                self.resync(plugin);
                Ok(())
            }
            id::CLOSE => {
                self.connected = false;
                self.dirty.fill(false);
                Ok(())
            }
            id::IDLE => {
                self.flush_dirty(plugin);
                self.queue_ready();
                Ok(())
            }
            id::PARAMETER_EDIT => {
                let index = self.plugin_index(attrs.int(attr::RINDEX)?)?;
                if attrs.int(attr::STARTED)? != 0 {
                    host.edit_started(index);
                } else {
                    host.edit_ended(index);
                }
                Ok(())
            }
            id::PARAMETER_SET => self.handle_parameter_set(attrs, plugin, host),
            id::MIDI => {
                let data = attrs.binary(attr::DATA)?;
                if data.len() < 3 {
                    return Err(BridgeError::InvalidArgument);
                }
                host.note_received(data[0] & 0x0f, data[1], data[2]);
                Ok(())
            }
            id::STATE_SET => self.handle_state_set(attrs, plugin),
            other => {
                log::warn!("bridge: unsupported message '{other}'");
                Err(BridgeError::NotImplemented)
            }
        }
    }

    fn handle_parameter_set<A, P, H>(
        &mut self,
        attrs: &A,
        plugin: &mut P,
        host: &mut H,
    ) -> BridgeResult<()>
    where
        A: AttributeSource + ?Sized,
        P: Plugin,
        H: HostDelegate + ?Sized,
    {
        let rindex = attrs.int(attr::RINDEX)?;
        let value = attrs.float(attr::VALUE)?;

        if self.program_count > 0 && rindex == 0 {
            if value < 0.0 {
                return Err(BridgeError::InternalError);
            }
            plugin.load_program((value + 0.5) as u32);
            return Ok(());
        }

        let index = self.plugin_index(rindex)?;
        plugin.set_parameter_value(index, value as f32);
        // Report the clamped value actually applied.
        host.parameter_performed(index, plugin.parameter_value(index));
        Ok(())
    }

    fn handle_state_set<A, P>(&mut self, attrs: &A, plugin: &mut P) -> BridgeResult<()>
    where
        A: AttributeSource + ?Sized,
        P: Plugin,
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
        plugin.set_state(&narrow_utf16(&key), &narrow_utf16(&value));
        Ok(())
    }

    /// Drain the next queued editor-bound message.
    pub fn pop_outbound(&mut self) -> Option<Message> {
        self.outbox.pop_front()
    }

    /// Full resync after `init`: current program, every parameter value,
    /// then `ready`.
    fn resync<P: Plugin>(&mut self, plugin: &mut P) {
        if self.program_count > 0 {
            self.queue_parameter_set(0, f64::from(plugin.current_program()));
        }
        for index in 0..self.dirty.len() as u32 {
            self.queue_parameter_set(
                i64::from(self.parameter_offset) + i64::from(index),
                f64::from(plugin.parameter_value(index)),
            );
        }
        self.dirty.fill(false);
        self.queue_ready();
    }

    fn flush_dirty<P: Plugin>(&mut self, plugin: &mut P) {
        for index in 0..self.dirty.len() as u32 {
            if std::mem::take(&mut self.dirty[index as usize]) {
                self.queue_parameter_set(
                    i64::from(self.parameter_offset) + i64::from(index),
                    f64::from(plugin.parameter_value(index)),
                );
            }
        }
    }

    fn queue_parameter_set(&mut self, rindex: i64, value: f64) {
        let mut msg = Message::new(id::PARAMETER_SET);
        msg.set_int(attr::TARGET, TARGET_EDITOR)
            .set_int(attr::RINDEX, rindex)
            .set_float(attr::VALUE, value);
        self.outbox.push_back(msg);
    }

    fn queue_ready(&mut self) {
        self.outbox.push_back(Message::new(id::READY));
    }

    fn plugin_index(&self, rindex: i64) -> BridgeResult<u32> {
        let index = rindex - i64::from(self.parameter_offset);
        if index < 0 || index >= self.dirty.len() as i64 {
            return Err(BridgeError::InvalidArgument);
        }
        Ok(index as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{UiController, UiDelegate};
    use crate::params::{BusInfo, ParameterInfo};

    struct TestPlugin {
        values: [f32; 2],
        program: u32,
        states: Vec<(String, String)>,
        sample_rate: f64,
    }

    impl TestPlugin {
        fn new() -> Self {
            Self {
                values: [0.5, 100.0],
                program: 0,
                states: Vec::new(),
                sample_rate: 44100.0,
            }
        }
    }

    static TEST_PARAMETERS: [ParameterInfo; 2] = [
        ParameterInfo::new("A", "a").with_range(0.0, 1.0),
        ParameterInfo::new("B", "b").with_range(0.0, 1000.0),
    ];
    static TEST_BUSES: [BusInfo; 1] = [BusInfo::stereo("Main")];

    impl Plugin for TestPlugin {
        fn parameters(&self) -> &'static [ParameterInfo] {
            &TEST_PARAMETERS
        }
        fn parameter_value(&self, index: u32) -> f32 {
            self.values[index as usize]
        }
        fn set_parameter_value(&mut self, index: u32, value: f32) {
            self.values[index as usize] = TEST_PARAMETERS[index as usize].clamp(value);
        }
        fn programs(&self) -> &'static [&'static str] {
            &["Default"]
        }
        fn current_program(&self) -> u32 {
            self.program
        }
        fn load_program(&mut self, index: u32) {
            self.program = index;
            self.values = [0.5, 100.0];
        }
        fn set_state(&mut self, key: &str, value: &str) {
            self.states.push((key.to_owned(), value.to_owned()));
        }
        fn input_buses(&self) -> &'static [BusInfo] {
            &TEST_BUSES
        }
        fn output_buses(&self) -> &'static [BusInfo] {
            &TEST_BUSES
        }
        fn set_sample_rate(&mut self, sample_rate: f64) {
            self.sample_rate = sample_rate;
        }
        fn sample_rate(&self) -> f64 {
            self.sample_rate
        }
        fn process(&mut self, _inputs: &[&[f32]], _outputs: &mut [&mut [f32]]) {}
    }

    #[derive(Default)]
    struct RecordingHost {
        edits: Vec<(u32, bool)>,
        performed: Vec<(u32, f32)>,
        notes: Vec<(u8, u8, u8)>,
    }

    impl HostDelegate for RecordingHost {
        fn edit_started(&mut self, index: u32) {
            self.edits.push((index, true));
        }
        fn edit_ended(&mut self, index: u32) {
            self.edits.push((index, false));
        }
        fn parameter_performed(&mut self, index: u32, value: f32) {
            self.performed.push((index, value));
        }
        fn note_received(&mut self, channel: u8, note: u8, velocity: u8) {
            self.notes.push((channel, note, velocity));
        }
    }

    #[derive(Default)]
    struct RecordingUi {
        parameters: Vec<(u32, f32)>,
        programs: Vec<u32>,
        sample_rates: Vec<f64>,
    }

    impl UiDelegate for RecordingUi {
        fn parameter_changed(&mut self, index: u32, value: f32) {
            self.parameters.push((index, value));
        }
        fn program_loaded(&mut self, index: u32) {
            self.programs.push(index);
        }
        fn sample_rate_changed(&mut self, sample_rate: f64) {
            self.sample_rates.push(sample_rate);
        }
    }

    fn bridge_for(plugin: &TestPlugin) -> PluginBridge {
        PluginBridge::new(
            plugin.parameters().len(),
            plugin.parameter_offset(),
            plugin.programs().len() as u32,
        )
    }

    /// Deliver every queued editor-bound message into the controller.
    fn pump_to_ui(
        bridge: &mut PluginBridge,
        controller: &mut UiController,
        ui: &mut RecordingUi,
    ) {
        while let Some(msg) = bridge.pop_outbound() {
            controller.notify(msg.id(), &msg, ui).unwrap();
        }
    }

    /// Deliver every queued processor-bound message into the bridge.
    fn pump_to_dsp(
        controller: &mut UiController,
        bridge: &mut PluginBridge,
        plugin: &mut TestPlugin,
        host: &mut RecordingHost,
    ) {
        while let Some(msg) = controller.pop_outbound() {
            bridge.handle(msg.id(), &msg, plugin, host).unwrap();
        }
    }

    #[test]
    fn test_init_resyncs_program_parameters_and_ready() {
        let mut plugin = TestPlugin::new();
        let mut bridge = bridge_for(&plugin);
        let mut host = RecordingHost::default();

        let mut controller = UiController::new(1, 1);
        let mut ui = RecordingUi::default();
        controller.connect().unwrap();
        pump_to_dsp(&mut controller, &mut bridge, &mut plugin, &mut host);
        assert!(bridge.is_connected());

        pump_to_ui(&mut bridge, &mut controller, &mut ui);
        assert_eq!(ui.programs, vec![0]);
        assert_eq!(ui.parameters, vec![(0, 0.5), (1, 100.0)]);

        // The resync ended with ready, so the next tick requests more.
        controller.on_timer(&mut ui);
        assert_eq!(controller.pop_outbound().unwrap().id(), id::IDLE);
    }

    #[test]
    fn test_idle_flushes_dirty_then_ready() {
        let mut plugin = TestPlugin::new();
        let mut bridge = bridge_for(&plugin);
        let mut host = RecordingHost::default();
        let mut controller = UiController::new(1, 1);
        let mut ui = RecordingUi::default();

        controller.connect().unwrap();
        pump_to_dsp(&mut controller, &mut bridge, &mut plugin, &mut host);
        pump_to_ui(&mut bridge, &mut controller, &mut ui);
        ui.parameters.clear();

        // Host automation touches parameter 1 behind the editor's back.
        plugin.set_parameter_value(1, 250.0);
        bridge.queue_parameter(1);

        controller.on_timer(&mut ui);
        pump_to_dsp(&mut controller, &mut bridge, &mut plugin, &mut host);
        pump_to_ui(&mut bridge, &mut controller, &mut ui);
        assert_eq!(ui.parameters, vec![(1, 250.0)]);

        // ready/idle alternation holds across the whole exchange.
        controller.on_timer(&mut ui);
        assert_eq!(controller.pop_outbound().unwrap().id(), id::IDLE);
    }

    #[test]
    fn test_editor_parameter_set_applies_and_performs() {
        let mut plugin = TestPlugin::new();
        let mut bridge = bridge_for(&plugin);
        let mut host = RecordingHost::default();
        let mut controller = UiController::new(1, 1);

        controller.connect().unwrap();
        // Out-of-range value: the plugin clamps, the host sees the clamp.
        controller.set_parameter_value(1, 2000.0).unwrap();
        pump_to_dsp(&mut controller, &mut bridge, &mut plugin, &mut host);

        assert_eq!(plugin.values[1], 1000.0);
        assert_eq!(host.performed, vec![(1, 1000.0)]);
    }

    #[test]
    fn test_edit_gestures_and_notes_reach_host() {
        let mut plugin = TestPlugin::new();
        let mut bridge = bridge_for(&plugin);
        let mut host = RecordingHost::default();
        let mut controller = UiController::new(1, 1);

        controller.connect().unwrap();
        controller.edit_parameter(0, true).unwrap();
        controller.edit_parameter(0, false).unwrap();
        controller.send_note(3, 64, 90).unwrap();
        pump_to_dsp(&mut controller, &mut bridge, &mut plugin, &mut host);

        assert_eq!(host.edits, vec![(0, true), (0, false)]);
        assert_eq!(host.notes, vec![(3, 64, 90)]);
    }

    #[test]
    fn test_state_set_reaches_plugin() {
        let mut plugin = TestPlugin::new();
        let mut bridge = bridge_for(&plugin);
        let mut host = RecordingHost::default();
        let mut controller = UiController::new(1, 1);

        controller.connect().unwrap();
        controller.set_state("mode", "wide").unwrap();
        pump_to_dsp(&mut controller, &mut bridge, &mut plugin, &mut host);
        assert_eq!(plugin.states, vec![("mode".into(), "wide".into())]);
    }

    #[test]
    fn test_missing_target_is_invalid_argument() {
        let mut plugin = TestPlugin::new();
        let mut bridge = bridge_for(&plugin);
        let mut host = RecordingHost::default();

        let msg = Message::new(id::INIT);
        assert_eq!(
            bridge.handle(msg.id(), &msg, &mut plugin, &mut host),
            Err(BridgeError::InvalidArgument)
        );
    }

    #[test]
    fn test_rindex_out_of_range_is_invalid_argument() {
        let mut plugin = TestPlugin::new();
        let mut bridge = bridge_for(&plugin);
        let mut host = RecordingHost::default();

        let mut msg = Message::new(id::PARAMETER_SET);
        msg.set_int(attr::TARGET, TARGET_PROCESSOR)
            .set_int(attr::RINDEX, 99)
            .set_float(attr::VALUE, 0.0);
        assert_eq!(
            bridge.handle(msg.id(), &msg, &mut plugin, &mut host),
            Err(BridgeError::InvalidArgument)
        );
    }

    #[test]
    fn test_close_clears_connection_and_dirty() {
        let mut plugin = TestPlugin::new();
        let mut bridge = bridge_for(&plugin);
        let mut host = RecordingHost::default();
        let mut controller = UiController::new(1, 1);
        let mut ui = RecordingUi::default();

        controller.connect().unwrap();
        pump_to_dsp(&mut controller, &mut bridge, &mut plugin, &mut host);
        pump_to_ui(&mut bridge, &mut controller, &mut ui);

        bridge.queue_parameter(0);
        controller.disconnect();
        pump_to_dsp(&mut controller, &mut bridge, &mut plugin, &mut host);
        assert!(!bridge.is_connected());

        // A later idle from a stale editor flushes nothing new.
        let mut msg = Message::new(id::IDLE);
        msg.set_int(attr::TARGET, TARGET_PROCESSOR);
        bridge.handle(msg.id(), &msg, &mut plugin, &mut host).unwrap();
        let replies: Vec<_> = std::iter::from_fn(|| bridge.pop_outbound()).collect();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].id(), id::READY);
    }

    #[test]
    fn test_queue_sample_rate_requires_connection() {
        let mut plugin = TestPlugin::new();
        let mut bridge = bridge_for(&plugin);
        let mut host = RecordingHost::default();

        bridge.queue_sample_rate(48000.0);
        assert!(bridge.pop_outbound().is_none());

        let mut msg = Message::new(id::INIT);
        msg.set_int(attr::TARGET, TARGET_PROCESSOR);
        bridge.handle(msg.id(), &msg, &mut plugin, &mut host).unwrap();
        while bridge.pop_outbound().is_some() {}

        bridge.queue_sample_rate(48000.0);
        let msg = bridge.pop_outbound().unwrap();
        assert_eq!(msg.id(), id::SAMPLE_RATE);
        assert_eq!(msg.float(attr::VALUE), Ok(48000.0));
    }
}
