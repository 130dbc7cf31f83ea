//! VST3-specific plugin configuration.
//!
//! Complements the shared [`trestle_core::Config`] with the identifiers the
//! VST3 factory needs.

use vst3::Steinberg::TUID;

/// VST3-specific plugin configuration.
///
/// # Example
///
/// ```ignore
/// use trestle_vst3::Vst3Config;
///
/// pub static VST3_CONFIG: Vst3Config =
///     Vst3Config::new("DCDDB4BA-2D6A-4EC3-A526-D3E7244FAAE3")
///         .with_categories("Fx|Filter");
/// ```
pub struct Vst3Config {
    /// Unique ID for the audio component class.
    pub component_uid: TUID,

    /// Factory subcategory string ("Fx", "Fx|Filter", "Instrument|Synth", ...).
    pub sub_categories: &'static str,
}

impl Vst3Config {
    /// Create a new VST3 configuration from a UUID string.
    ///
    /// The plugin uses the combined component architecture (one class for
    /// processor and controller).
    ///
    /// # Arguments
    ///
    /// * `uuid` - UUID string in format "XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX"
    pub const fn new(uuid: &'static str) -> Self {
        const fn hex_to_u8(c: u8) -> u8 {
            match c {
                b'0'..=b'9' => c - b'0',
                b'A'..=b'F' => c - b'A' + 10,
                b'a'..=b'f' => c - b'a' + 10,
                _ => panic!("Invalid hex character in UUID"),
            }
        }

        const fn parse_u32(bytes: &[u8], start: usize) -> u32 {
            let mut result: u32 = 0;
            let mut i = 0;
            let mut hex_count = 0;
            while hex_count < 8 {
                let c = bytes[start + i];
                if c != b'-' {
                    result = (result << 4) | (hex_to_u8(c) as u32);
                    hex_count += 1;
                }
                i += 1;
            }
            result
        }

        let bytes = uuid.as_bytes();
        let part1 = parse_u32(bytes, 0);
        let part2 = parse_u32(bytes, 9);
        let part3 = parse_u32(bytes, 19);
        let part4 = parse_u32(bytes, 28);

        Self {
            component_uid: vst3::uid(part1, part2, part3, part4),
            sub_categories: "Fx",
        }
    }

    /// Set the factory subcategory string.
    pub const fn with_categories(mut self, categories: &'static str) -> Self {
        self.sub_categories = categories;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_parsing_matches_uid() {
        let config = Vst3Config::new("DCDDB4BA-2D6A-4EC3-A526-D3E7244FAAE3");
        assert_eq!(
            config.component_uid,
            vst3::uid(0xDCDDB4BA, 0x2D6A4EC3, 0xA526D3E7, 0x244FAAE3)
        );
    }
}
