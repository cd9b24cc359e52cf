//! How closely a mock DDS imitates the serial board's latency.

use serde::Deserialize;

/// Selected with `mode = "instant" | "realistic"` in a `mock_dds` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MockMode {
    /// Commands complete immediately
    #[default]
    Instant,
    /// Each command waits out a serial round trip; `reset` also waits for the board to settle
    Realistic,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mode() {
        assert_eq!(MockMode::default(), MockMode::Instant);
    }

    #[test]
    fn test_mode_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            mode: MockMode,
        }
        let w: Wrapper = toml::from_str("mode = \"realistic\"").unwrap();
        assert_eq!(w.mode, MockMode::Realistic);
    }
}
