//! Render configuration (component I, §5 of the design notes).
//!
//! Loadable from CLI flags directly, or from a JSON file via `--config`.

use crate::error::{Result, SoundRomError};
use serde::{Deserialize, Serialize};

/// Tunables for a render session. CLI flags override fields loaded from a
/// `--config` file; the CLI itself constructs this from `env::args()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Host sample rate for polychip/FM synthesis output.
    pub sample_rate: u32,
    /// Override for the interpreter's time cap, in seconds. `None` uses the
    /// handler-type default (30s SFX, 300s music).
    pub max_seconds: Option<f64>,
    /// Sample rate the LPC chip renders at; the real chip runs fixed at 8 kHz.
    pub lpc_sample_rate: u32,
    /// Optional path to a sound-name CSV (`id, subsystem, description`).
    pub sound_names_csv: Option<String>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        RenderConfig {
            sample_rate: 44_100,
            max_seconds: None,
            lpc_sample_rate: 8_000,
            sound_names_csv: None,
        }
    }
}

impl RenderConfig {
    /// Load a config from a JSON file, falling back to defaults for absent fields.
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| SoundRomError::Config(format!("invalid config JSON: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_design_notes() {
        let cfg = RenderConfig::default();
        assert_eq!(cfg.sample_rate, 44_100);
        assert_eq!(cfg.lpc_sample_rate, 8_000);
        assert!(cfg.max_seconds.is_none());
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let json = r#"{"sample_rate": 48000}"#;
        let cfg: RenderConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.sample_rate, 48_000);
        assert_eq!(cfg.lpc_sample_rate, 8_000);
    }
}
