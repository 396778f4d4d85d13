//! Fluent builder for [`Engine`] construction.

use crate::engine::Engine;
use crate::error::Result;

use std::time::Duration;

pub(crate) struct Config {
    pub(crate) poll_interval: Duration,
    pub(crate) max_descriptors: usize,
    pub(crate) thread_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            max_descriptors: 1024,
            thread_name: String::from("ioqueue-driver"),
        }
    }
}

/// Builder for constructing [`Engine`] instances.
///
/// # Example
/// ```
/// use ioqueue::EngineBuilder;
/// use std::time::Duration;
///
/// let engine = EngineBuilder::new()
///     .poll_interval(Duration::from_millis(10))
///     .max_descriptors(16)
///     .build()
///     .unwrap();
/// engine.shutdown();
/// ```
pub struct EngineBuilder {
    config: Config,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// How often the completion driver re-examines pending operations when
    /// no readiness event arrives. Defaults to 50ms.
    ///
    /// This bounds the delay before retrying a transfer whose buffer was
    /// locked by the caller.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Maximum number of live descriptors, merged ones included. Defaults to 1024.
    ///
    /// Values above `u32::MAX` are clamped, since descriptor ids are 32-bit.
    pub fn max_descriptors(mut self, max: usize) -> Self {
        self.config.max_descriptors = max.min(u32::MAX as usize);
        self
    }

    /// Name given to the completion driver thread.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.thread_name = name.into();
        self
    }

    /// Builds the engine and starts its completion driver.
    pub fn build(self) -> Result<Engine> {
        Engine::with_config(self.config)
    }
}
