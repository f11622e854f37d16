//! Engine configuration
//!
//! Layered: `config/default.toml`, then an optional per-environment
//! file, then `VOICE_CALL__`-prefixed environment variables. Every
//! field has a default so a bare environment still runs.

use serde::{Deserialize, Serialize};

use voice_call_core::Error;
use voice_call_transport::EndpointSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub endpoint: EndpointSettings,

    /// Upper bound in seconds for connect + handshake in proxy mode
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default)]
    pub capture: CaptureSettings,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSettings {
    /// Input device name; `None` selects the system default
    #[serde(default)]
    pub device: Option<String>,

    /// Capture window length in milliseconds
    #[serde(default = "default_frame_ms")]
    pub frame_ms: u32,
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_frame_ms() -> u32 {
    voice_call_audio::FRAME_MS
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoint: EndpointSettings::default(),
            connect_timeout_secs: default_connect_timeout_secs(),
            capture: CaptureSettings::default(),
            log_level: default_log_level(),
        }
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            device: None,
            frame_ms: default_frame_ms(),
        }
    }
}

impl Settings {
    /// Load layered configuration. `env` selects an optional overlay
    /// file, e.g. `config/production.toml`.
    pub fn load(env: Option<&str>) -> Result<Self, Error> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false));

        if let Some(env) = env {
            builder = builder
                .add_source(config::File::with_name(&format!("config/{env}")).required(false));
        }

        let settings: Settings = builder
            .add_source(config::Environment::with_prefix("VOICE_CALL").separator("__"))
            .build()
            .map_err(|e| Error::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| Error::Config(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !(20..=1000).contains(&self.capture.frame_ms) {
            return Err(Error::Config(format!(
                "capture.frame_ms must be between 20 and 1000, got {}",
                self.capture.frame_ms
            )));
        }
        if self.connect_timeout_secs == 0 {
            return Err(Error::Config(
                "connect_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.connect_timeout_secs, 30);
        assert_eq!(settings.capture.frame_ms, 256);
    }

    #[test]
    fn test_rejects_out_of_range_frame() {
        let mut settings = Settings::default();
        settings.capture.frame_ms = 5;
        assert!(matches!(settings.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let mut settings = Settings::default();
        settings.connect_timeout_secs = 0;
        assert!(matches!(settings.validate(), Err(Error::Config(_))));
    }
}
