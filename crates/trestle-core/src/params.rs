//! Parameter and bus descriptors.

/// Static description of one plain-value parameter.
///
/// Values travel over the wire and through automation as plain values;
/// normalized [0, 1] conversion happens only at the VST3 surface, using the
/// range stored here.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterInfo {
    /// Display name.
    pub name: &'static str,
    /// Stable machine-readable identifier.
    pub symbol: &'static str,
    /// Unit label ("dB", "Hz", ...).
    pub unit: &'static str,
    pub default: f32,
    pub min: f32,
    pub max: f32,
}

impl ParameterInfo {
    pub const fn new(name: &'static str, symbol: &'static str) -> Self {
        Self {
            name,
            symbol,
            unit: "",
            default: 0.0,
            min: 0.0,
            max: 1.0,
        }
    }

    pub const fn with_unit(mut self, unit: &'static str) -> Self {
        self.unit = unit;
        self
    }

    pub const fn with_range(mut self, min: f32, max: f32) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub const fn with_default(mut self, default: f32) -> Self {
        self.default = default;
        self
    }

    /// Clamp a plain value into this parameter's range.
    pub fn clamp(&self, value: f32) -> f32 {
        value.max(self.min).min(self.max)
    }

    /// Plain → normalized [0, 1].
    pub fn normalize(&self, plain: f32) -> f64 {
        if self.max <= self.min {
            return 0.0;
        }
        let clamped = self.clamp(plain);
        f64::from((clamped - self.min) / (self.max - self.min))
    }

    /// Normalized [0, 1] → plain.
    pub fn denormalize(&self, normalized: f64) -> f32 {
        let n = normalized.clamp(0.0, 1.0) as f32;
        self.min + n * (self.max - self.min)
    }
}

/// Static description of one audio bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusInfo {
    pub name: &'static str,
    pub channel_count: u32,
}

impl BusInfo {
    pub const fn stereo(name: &'static str) -> Self {
        Self {
            name,
            channel_count: 2,
        }
    }

    pub const fn mono(name: &'static str) -> Self {
        Self {
            name,
            channel_count: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GAIN: ParameterInfo = ParameterInfo::new("Gain", "gain")
        .with_unit("dB")
        .with_range(-24.0, 24.0);

    #[test]
    fn test_normalize_denormalize_round_trip() {
        for plain in [-24.0f32, -6.0, 0.0, 12.0, 24.0] {
            let norm = GAIN.normalize(plain);
            assert!((GAIN.denormalize(norm) - plain).abs() < 1e-4);
        }
    }

    #[test]
    fn test_normalize_clamps_out_of_range() {
        assert_eq!(GAIN.normalize(-100.0), 0.0);
        assert_eq!(GAIN.normalize(100.0), 1.0);
        assert_eq!(GAIN.denormalize(-0.5), -24.0);
        assert_eq!(GAIN.denormalize(1.5), 24.0);
    }

    #[test]
    fn test_clamp() {
        assert_eq!(GAIN.clamp(30.0), 24.0);
        assert_eq!(GAIN.clamp(-30.0), -24.0);
        assert_eq!(GAIN.clamp(3.0), 3.0);
    }
}
