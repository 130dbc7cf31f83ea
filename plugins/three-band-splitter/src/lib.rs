//! 3-band splitter plugin.
//!
//! Splits a stereo input into low, mid and high bands on three separate
//! stereo outputs. The crossovers are two cascaded one-pole filters; the
//! mid band is whatever the low-pass and high-pass leave behind, so the
//! three outputs sum back to the input at unit gain.

use trestle::prelude::*;

const AMP_DB: f32 = 8.656_170_245;
const DC_ADD: f32 = 1e-30;
const PI: f32 = 3.141_592_654;

pub static CONFIG: Config = Config::new("3 Band Splitter")
    .with_vendor("Trestle Audio")
    .with_url("https://github.com/trestle-audio/trestle")
    .with_email("hello@trestle.audio")
    .with_version("1.0.0");

pub static VST3_CONFIG: Vst3Config = Vst3Config::new("A3D43C8A-5A2F-4C8E-9B1D-6E02A7C5B914")
    .with_categories("Fx|Filter");

const PARAM_LOW: u32 = 0;
const PARAM_MID: u32 = 1;
const PARAM_HIGH: u32 = 2;
const PARAM_MASTER: u32 = 3;
const PARAM_LOW_MID_FREQ: u32 = 4;
const PARAM_MID_HIGH_FREQ: u32 = 5;

static PARAMETERS: [ParameterInfo; 6] = [
    ParameterInfo::new("Low", "low")
        .with_unit("dB")
        .with_range(-24.0, 24.0),
    ParameterInfo::new("Mid", "mid")
        .with_unit("dB")
        .with_range(-24.0, 24.0),
    ParameterInfo::new("High", "high")
        .with_unit("dB")
        .with_range(-24.0, 24.0),
    ParameterInfo::new("Master", "master")
        .with_unit("dB")
        .with_range(-24.0, 24.0),
    ParameterInfo::new("Low-Mid Freq", "low_mid")
        .with_unit("Hz")
        .with_range(0.0, 1000.0)
        .with_default(440.0),
    ParameterInfo::new("Mid-High Freq", "mid_high")
        .with_unit("Hz")
        .with_range(1000.0, 20000.0)
        .with_default(1000.0),
];

static PROGRAMS: [&str; 1] = ["Default"];

static INPUTS: [BusInfo; 1] = [BusInfo::stereo("Input")];
static OUTPUTS: [BusInfo; 3] = [
    BusInfo::stereo("Low"),
    BusInfo::stereo("Mid"),
    BusInfo::stereo("High"),
];

fn db_to_gain(db: f32) -> f32 {
    (db / AMP_DB).exp()
}

pub struct ThreeBandSplitter {
    // Parameter values, in plain units.
    low_db: f32,
    mid_db: f32,
    high_db: f32,
    master_db: f32,
    low_mid_freq: f32,
    mid_high_freq: f32,

    // Derived gains and filter coefficients.
    low_vol: f32,
    mid_vol: f32,
    high_vol: f32,
    out_vol: f32,
    freq_lp: f32,
    freq_hp: f32,
    a0_lp: f32,
    b1_lp: f32,
    a0_hp: f32,
    b1_hp: f32,

    // Filter state, one slot per channel.
    tmp_lp: [f32; 2],
    tmp_hp: [f32; 2],

    sample_rate: f64,
}

impl Default for ThreeBandSplitter {
    fn default() -> Self {
        let mut plugin = Self {
            low_db: 0.0,
            mid_db: 0.0,
            high_db: 0.0,
            master_db: 0.0,
            low_mid_freq: 440.0,
            mid_high_freq: 1000.0,
            low_vol: 1.0,
            mid_vol: 1.0,
            high_vol: 1.0,
            out_vol: 1.0,
            freq_lp: 200.0,
            freq_hp: 2000.0,
            a0_lp: 0.0,
            b1_lp: 0.0,
            a0_hp: 0.0,
            b1_hp: 0.0,
            tmp_lp: [0.0; 2],
            tmp_hp: [0.0; 2],
            sample_rate: 44100.0,
        };
        plugin.load_program(0);
        plugin.deactivate();
        plugin
    }
}

impl Plugin for ThreeBandSplitter {
    fn parameters(&self) -> &'static [ParameterInfo] {
        &PARAMETERS
    }

    fn parameter_value(&self, index: u32) -> f32 {
        match index {
            PARAM_LOW => self.low_db,
            PARAM_MID => self.mid_db,
            PARAM_HIGH => self.high_db,
            PARAM_MASTER => self.master_db,
            PARAM_LOW_MID_FREQ => self.low_mid_freq,
            PARAM_MID_HIGH_FREQ => self.mid_high_freq,
            _ => 0.0,
        }
    }

    fn set_parameter_value(&mut self, index: u32, value: f32) {
        // Coefficients need a valid rate; drop writes until one is known.
        if self.sample_rate <= 0.0 {
            return;
        }

        match index {
            PARAM_LOW => {
                self.low_db = value;
                self.low_vol = db_to_gain(self.low_db);
            }
            PARAM_MID => {
                self.mid_db = value;
                self.mid_vol = db_to_gain(self.mid_db);
            }
            PARAM_HIGH => {
                self.high_db = value;
                self.high_vol = db_to_gain(self.high_db);
            }
            PARAM_MASTER => {
                self.master_db = value;
                self.out_vol = db_to_gain(self.master_db);
            }
            PARAM_LOW_MID_FREQ => {
                // The crossovers may not cross each other.
                self.low_mid_freq = value.min(self.mid_high_freq);
                self.freq_lp = self.low_mid_freq;
                let x = (-2.0 * PI * self.freq_lp / self.sample_rate as f32).exp();
                self.a0_lp = 1.0 - x;
                self.b1_lp = -x;
            }
            PARAM_MID_HIGH_FREQ => {
                self.mid_high_freq = value.max(self.low_mid_freq);
                self.freq_hp = self.mid_high_freq;
                let x = (-2.0 * PI * self.freq_hp / self.sample_rate as f32).exp();
                self.a0_hp = 1.0 - x;
                self.b1_hp = -x;
            }
            _ => {}
        }
    }

    fn programs(&self) -> &'static [&'static str] {
        &PROGRAMS
    }

    fn load_program(&mut self, index: u32) {
        if index != 0 {
            return;
        }

        self.low_db = 0.0;
        self.mid_db = 0.0;
        self.high_db = 0.0;
        self.master_db = 0.0;
        self.low_mid_freq = 220.0;
        self.mid_high_freq = 2000.0;

        self.low_vol = 1.0;
        self.mid_vol = 1.0;
        self.high_vol = 1.0;
        self.out_vol = 1.0;
        self.freq_lp = 200.0;
        self.freq_hp = 2000.0;

        self.activate();
    }

    fn input_buses(&self) -> &'static [BusInfo] {
        &INPUTS
    }

    fn output_buses(&self) -> &'static [BusInfo] {
        &OUTPUTS
    }

    fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        self.activate();
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn activate(&mut self) {
        let sr = self.sample_rate as f32;

        let x_lp = (-2.0 * PI * self.freq_lp / sr).exp();
        self.a0_lp = 1.0 - x_lp;
        self.b1_lp = -x_lp;

        let x_hp = (-2.0 * PI * self.freq_hp / sr).exp();
        self.a0_hp = 1.0 - x_hp;
        self.b1_hp = -x_hp;
    }

    fn deactivate(&mut self) {
        self.tmp_lp = [0.0; 2];
        self.tmp_hp = [0.0; 2];
    }

    fn process(&mut self, inputs: &[&[f32]], outputs: &mut [&mut [f32]]) {
        if inputs.len() < 2 || outputs.len() < 6 {
            return;
        }
        let frames = inputs[0].len().min(inputs[1].len());

        for i in 0..frames {
            let in1 = inputs[0][i];
            let in2 = inputs[1][i];

            self.tmp_lp[0] = self.a0_lp * in1 - self.b1_lp * self.tmp_lp[0] + DC_ADD;
            self.tmp_lp[1] = self.a0_lp * in2 - self.b1_lp * self.tmp_lp[1] + DC_ADD;
            let low1 = self.tmp_lp[0] - DC_ADD;
            let low2 = self.tmp_lp[1] - DC_ADD;

            self.tmp_hp[0] = self.a0_hp * in1 - self.b1_hp * self.tmp_hp[0] + DC_ADD;
            self.tmp_hp[1] = self.a0_hp * in2 - self.b1_hp * self.tmp_hp[1] + DC_ADD;
            let high1 = in1 - self.tmp_hp[0] - DC_ADD;
            let high2 = in2 - self.tmp_hp[1] - DC_ADD;

            outputs[5][i] = high2 * self.high_vol * self.out_vol;
            outputs[4][i] = high1 * self.high_vol * self.out_vol;
            outputs[3][i] = (in2 - low2 - high2) * self.mid_vol * self.out_vol;
            outputs[2][i] = (in1 - low1 - high1) * self.mid_vol * self.out_vol;
            outputs[1][i] = low2 * self.low_vol * self.out_vol;
            outputs[0][i] = low1 * self.low_vol * self.out_vol;
        }
    }

    fn create_editor(&self) -> Option<Box<dyn Editor>> {
        Some(Box::new(SplitterEditor::default()))
    }
}

/// Headless editor: mirrors the processor state and queues user edits.
///
/// A widget toolkit would render from this mirror; the bridge protocol is
/// identical either way.
#[derive(Default)]
pub struct SplitterEditor {
    values: [f32; 6],
    program: u32,
    sample_rate: f64,
    open: bool,
    events: Vec<UiEvent>,
}

impl SplitterEditor {
    pub fn parameter(&self, index: u32) -> f32 {
        self.values.get(index as usize).copied().unwrap_or(0.0)
    }

    /// Queue a value change as if the user dragged a knob.
    pub fn set_parameter(&mut self, index: u32, value: f32) {
        if let Some(slot) = self.values.get_mut(index as usize) {
            *slot = value;
        }
        self.events.push(UiEvent::EditParameter {
            index,
            started: true,
        });
        self.events.push(UiEvent::SetParameterValue { index, value });
        self.events.push(UiEvent::EditParameter {
            index,
            started: false,
        });
    }
}

impl UiDelegate for SplitterEditor {
    fn parameter_changed(&mut self, index: u32, value: f32) {
        if let Some(slot) = self.values.get_mut(index as usize) {
            *slot = value;
        }
    }

    fn program_loaded(&mut self, index: u32) {
        self.program = index;
    }

    fn sample_rate_changed(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
    }
}

impl Editor for SplitterEditor {
    fn open(&mut self, _parent: usize) {
        self.open = true;
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn size(&self) -> Size {
        Size::new(392, 286)
    }

    fn take_events(&mut self) -> Vec<UiEvent> {
        std::mem::take(&mut self.events)
    }
}

trestle::prelude::export_vst3!(CONFIG, VST3_CONFIG, ThreeBandSplitter);

#[cfg(test)]
mod tests {
    use super::*;

    fn run(plugin: &mut ThreeBandSplitter, left: &[f32], right: &[f32]) -> Vec<Vec<f32>> {
        let frames = left.len();
        let mut outputs: Vec<Vec<f32>> = vec![vec![0.0; frames]; 6];
        {
            let inputs: [&[f32]; 2] = [left, right];
            let mut out_refs: Vec<&mut [f32]> =
                outputs.iter_mut().map(|o| o.as_mut_slice()).collect();
            plugin.process(&inputs, &mut out_refs);
        }
        outputs
    }

    fn prepared() -> ThreeBandSplitter {
        let mut plugin = ThreeBandSplitter::default();
        plugin.set_sample_rate(48000.0);
        plugin.activate();
        plugin
    }

    #[test]
    fn test_program_defaults() {
        let plugin = ThreeBandSplitter::default();
        assert_eq!(plugin.parameter_value(PARAM_LOW), 0.0);
        assert_eq!(plugin.parameter_value(PARAM_MASTER), 0.0);
        assert_eq!(plugin.parameter_value(PARAM_LOW_MID_FREQ), 220.0);
        assert_eq!(plugin.parameter_value(PARAM_MID_HIGH_FREQ), 2000.0);
        assert_eq!(plugin.current_program(), 0);
    }

    #[test]
    fn test_bands_sum_to_input_at_unit_gain() {
        let mut plugin = prepared();

        let left: Vec<f32> = (0..256)
            .map(|i| (i as f32 * 0.1).sin() * 0.5)
            .collect();
        let right: Vec<f32> = (0..256)
            .map(|i| (i as f32 * 0.07).cos() * 0.25)
            .collect();
        let outputs = run(&mut plugin, &left, &right);

        for i in 0..left.len() {
            let sum_left = outputs[0][i] + outputs[2][i] + outputs[4][i];
            let sum_right = outputs[1][i] + outputs[3][i] + outputs[5][i];
            assert!((sum_left - left[i]).abs() < 1e-5, "frame {i}");
            assert!((sum_right - right[i]).abs() < 1e-5, "frame {i}");
        }
    }

    #[test]
    fn test_impulse_matches_filter_recurrence() {
        let mut plugin = prepared();

        let mut impulse = vec![0.0f32; 64];
        impulse[0] = 1.0;
        let outputs = run(&mut plugin, &impulse, &impulse);

        // Same recurrence, evaluated independently.
        let x_lp = (-2.0 * PI * 200.0 / 48000.0f32).exp();
        let (a0_lp, b1_lp) = (1.0 - x_lp, -x_lp);
        let x_hp = (-2.0 * PI * 2000.0 / 48000.0f32).exp();
        let (a0_hp, b1_hp) = (1.0 - x_hp, -x_hp);

        let mut tmp_lp = 0.0f32;
        let mut tmp_hp = 0.0f32;
        for (i, sample) in impulse.iter().enumerate() {
            tmp_lp = a0_lp * sample - b1_lp * tmp_lp + DC_ADD;
            tmp_hp = a0_hp * sample - b1_hp * tmp_hp + DC_ADD;
            let low = tmp_lp - DC_ADD;
            let high = sample - tmp_hp - DC_ADD;
            assert!((outputs[0][i] - low).abs() < 1e-7, "frame {i}");
            assert!((outputs[4][i] - high).abs() < 1e-7, "frame {i}");
            assert!((outputs[2][i] - (sample - low - high)).abs() < 1e-7, "frame {i}");
        }
    }

    #[test]
    fn test_gain_parameters_scale_bands() {
        let mut plugin = prepared();
        plugin.set_parameter_value(PARAM_LOW, 6.0);
        plugin.set_parameter_value(PARAM_MASTER, -6.0);

        let mut reference = prepared();

        let signal: Vec<f32> = (0..128).map(|i| (i as f32 * 0.05).sin()).collect();
        let outputs = run(&mut plugin, &signal, &signal);
        let baseline = run(&mut reference, &signal, &signal);

        let low_gain = (6.0 / AMP_DB).exp();
        let master_gain = (-6.0 / AMP_DB).exp();
        for i in 0..signal.len() {
            assert!(
                (outputs[0][i] - baseline[0][i] * low_gain * master_gain).abs() < 1e-5,
                "frame {i}"
            );
            assert!(
                (outputs[2][i] - baseline[2][i] * master_gain).abs() < 1e-5,
                "frame {i}"
            );
        }
    }

    #[test]
    fn test_crossovers_cannot_cross() {
        let mut plugin = prepared();

        plugin.set_parameter_value(PARAM_MID_HIGH_FREQ, 1500.0);
        plugin.set_parameter_value(PARAM_LOW_MID_FREQ, 900.0);
        assert_eq!(plugin.parameter_value(PARAM_LOW_MID_FREQ), 900.0);

        // Pushing the upper crossover below the lower one pins it there.
        plugin.set_parameter_value(PARAM_MID_HIGH_FREQ, 100.0);
        assert_eq!(plugin.parameter_value(PARAM_MID_HIGH_FREQ), 900.0);

        // And the lower crossover cannot exceed the upper.
        plugin.set_parameter_value(PARAM_LOW_MID_FREQ, 1000.0);
        assert_eq!(plugin.parameter_value(PARAM_LOW_MID_FREQ), 900.0);
    }

    #[test]
    fn test_parameter_writes_dropped_without_sample_rate() {
        let mut plugin = ThreeBandSplitter::default();
        plugin.set_sample_rate(0.0);
        plugin.set_parameter_value(PARAM_LOW, 12.0);
        assert_eq!(plugin.parameter_value(PARAM_LOW), 0.0);
    }

    #[test]
    fn test_deactivate_clears_filter_state() {
        let mut plugin = prepared();
        let noise: Vec<f32> = (0..64).map(|i| ((i * 37 % 19) as f32 - 9.0) / 9.0).collect();
        let first = run(&mut plugin, &noise, &noise);

        plugin.deactivate();
        plugin.activate();
        let second = run(&mut plugin, &noise, &noise);

        for i in 0..noise.len() {
            assert_eq!(first[0][i], second[0][i], "frame {i}");
        }
    }

    #[test]
    fn test_editor_round_trip_through_bridge() {
        use trestle::core::{PluginBridge, UiController};

        let mut plugin = ThreeBandSplitter::default();
        plugin.set_sample_rate(48000.0);
        let mut bridge = PluginBridge::new(
            plugin.parameters().len(),
            plugin.parameter_offset(),
            plugin.programs().len() as u32,
        );
        let mut controller = UiController::new(plugin.parameter_offset(), 1);
        let mut editor = SplitterEditor::default();
        let mut host = NullHostDelegate;

        controller.connect().unwrap();
        while let Some(msg) = controller.pop_outbound() {
            bridge.handle(msg.id(), &msg, &mut plugin, &mut host).unwrap();
        }
        while let Some(msg) = bridge.pop_outbound() {
            controller.notify(msg.id(), &msg, &mut editor).unwrap();
        }

        // The editor mirror now matches the program defaults.
        assert_eq!(editor.parameter(PARAM_LOW_MID_FREQ), 220.0);
        assert_eq!(editor.parameter(PARAM_MID_HIGH_FREQ), 2000.0);

        // A knob drag reaches the plugin.
        editor.set_parameter(PARAM_HIGH, -12.0);
        for event in editor.take_events() {
            controller.apply_event(&event).unwrap();
        }
        while let Some(msg) = controller.pop_outbound() {
            bridge.handle(msg.id(), &msg, &mut plugin, &mut host).unwrap();
        }
        assert_eq!(plugin.parameter_value(PARAM_HIGH), -12.0);
    }
}
