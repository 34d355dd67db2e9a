//! Tool configuration: device identity and protocol timings.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::channel::ChannelTiming;
use crate::protocol::constants::{
    CONFIG_INTERFACE, END_SETTLE_DELAY, GMK_VENDOR_ID, GMK87_PRODUCT_ID, LATENCY_FACTOR,
    RESPONSE_TIMEOUT,
};
use crate::timecodec::TimeCodec;

/// Configuration for a keyboard session.
///
/// Every field has a default, so a TOML file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KbdConfig {
    /// USB vendor id.
    pub vendor_id: u16,
    /// USB product id.
    pub product_id: u16,
    /// Interface carrying the configuration protocol.
    pub interface: u8,
    /// Response budget per command, in milliseconds.
    pub response_timeout_ms: u64,
    /// Pause before `End`, in milliseconds.
    pub end_settle_ms: u64,
    /// Multiplier applied to the read duration when setting the clock.
    pub latency_factor: u32,
}

impl Default for KbdConfig {
    fn default() -> Self {
        Self {
            vendor_id: GMK_VENDOR_ID,
            product_id: GMK87_PRODUCT_ID,
            interface: CONFIG_INTERFACE,
            response_timeout_ms: RESPONSE_TIMEOUT.as_millis() as u64,
            end_settle_ms: END_SETTLE_DELAY.as_millis() as u64,
            latency_factor: LATENCY_FACTOR,
        }
    }
}

impl KbdConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: KbdConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn timing(&self) -> ChannelTiming {
        ChannelTiming {
            response_timeout: Duration::from_millis(self.response_timeout_ms),
            end_settle: Duration::from_millis(self.end_settle_ms),
        }
    }

    pub fn time_codec(&self) -> TimeCodec {
        TimeCodec::new(self.latency_factor)
    }
}
