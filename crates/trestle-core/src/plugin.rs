//! The plugin trait implemented by processors.

use crate::gui::Editor;
use crate::params::{BusInfo, ParameterInfo};

/// A DSP plugin hosted behind the bridge.
///
/// Parameters use plain values throughout; the VST3 surface converts to and
/// from normalized values using the ranges in [`ParameterInfo`].
///
/// Threading: `process`, `activate` and `deactivate` run on the audio
/// thread; everything else runs on the host's main thread. The wrapper
/// guarantees the calls never overlap.
pub trait Plugin: Send + 'static {
    /// Static parameter descriptors, in stable order.
    fn parameters(&self) -> &'static [ParameterInfo];

    /// Current plain value of a parameter.
    fn parameter_value(&self, index: u32) -> f32;

    /// Set a parameter from a plain value. Implementations clamp and may
    /// ignore the write while no valid sample rate is known.
    fn set_parameter_value(&mut self, index: u32, value: f32);

    /// Program (factory preset) names. Empty when the plugin has none.
    fn programs(&self) -> &'static [&'static str] {
        &[]
    }

    fn current_program(&self) -> u32 {
        0
    }

    fn load_program(&mut self, index: u32) {
        let _ = index;
    }

    /// Apply a key/value state pair sent by the editor.
    fn set_state(&mut self, key: &str, value: &str) {
        let (_, _) = (key, value);
    }

    fn input_buses(&self) -> &'static [BusInfo];

    fn output_buses(&self) -> &'static [BusInfo];

    /// A new sample rate. Implementations recompute anything derived from
    /// it; called before activation and on host reconfiguration.
    fn set_sample_rate(&mut self, sample_rate: f64);

    fn sample_rate(&self) -> f64;

    /// Processing is about to start. Reset derived coefficients.
    fn activate(&mut self) {}

    /// Processing stopped. Clear filter state so a restart is silent.
    fn deactivate(&mut self) {}

    /// Process one block. Slices are per-channel, inputs and outputs
    /// flattened across buses in declaration order, all of equal length.
    fn process(&mut self, inputs: &[&[f32]], outputs: &mut [&mut [f32]]);

    /// Create the plugin's editor, if it has one.
    fn create_editor(&self) -> Option<Box<dyn Editor>> {
        None
    }

    /// Number of raw message/automation indices reserved ahead of the
    /// plugin parameters: one for the program slot when programs exist.
    fn parameter_offset(&self) -> u32 {
        u32::from(!self.programs().is_empty())
    }
}
