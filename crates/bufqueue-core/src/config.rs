//! Consumer-side queue defaults

use crate::slot::{MAX_MAX_ACQUIRED_BUFFERS, NUM_BUFFER_SLOTS};
use crate::format::{PixelFormat, Usage};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Initial configuration of a buffer queue.
///
/// ```toml
/// consumer_name = "compositor"
/// default_width = 1920
/// default_height = 1080
/// max_acquired_buffer_count = 2
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub consumer_name: String,
    pub default_width: u32,
    pub default_height: u32,
    pub default_format: PixelFormat,
    /// Slot count used when the producer has not overridden it
    pub default_max_buffer_count: usize,
    pub max_acquired_buffer_count: usize,
    pub max_dequeued_buffer_count: usize,
    pub consumer_usage_bits: Usage,
    /// Grant an extra slot to producers dequeuing in async mode
    pub use_async_buffer: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            consumer_name: "unnamed".to_string(),
            default_width: 1,
            default_height: 1,
            default_format: PixelFormat::Rgba8888,
            default_max_buffer_count: 2,
            max_acquired_buffer_count: 1,
            max_dequeued_buffer_count: 1,
            consumer_usage_bits: Usage::NONE,
            use_async_buffer: true,
        }
    }
}

impl QueueConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: QueueConfig = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_width == 0 || self.default_height == 0 {
            return Err(Error::Config(format!(
                "default size {}x{} must be non-zero",
                self.default_width, self.default_height
            )));
        }
        if !(1..=MAX_MAX_ACQUIRED_BUFFERS).contains(&self.max_acquired_buffer_count) {
            return Err(Error::Config(format!(
                "max_acquired_buffer_count {} outside 1..={}",
                self.max_acquired_buffer_count, MAX_MAX_ACQUIRED_BUFFERS
            )));
        }
        let min_default = if self.use_async_buffer { 2 } else { 1 };
        if !(min_default..=NUM_BUFFER_SLOTS).contains(&self.default_max_buffer_count) {
            return Err(Error::Config(format!(
                "default_max_buffer_count {} outside {}..={}",
                self.default_max_buffer_count, min_default, NUM_BUFFER_SLOTS
            )));
        }
        let headroom = NUM_BUFFER_SLOTS - self.max_acquired_buffer_count;
        if self.max_dequeued_buffer_count == 0 || self.max_dequeued_buffer_count >= headroom {
            return Err(Error::Config(format!(
                "max_dequeued_buffer_count {} outside 1..{}",
                self.max_dequeued_buffer_count, headroom
            )));
        }
        Ok(())
    }
}
