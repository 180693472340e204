// MIT License - Copyright (c) 2023 ad2driver contributors

use serde::{Deserialize, Serialize};

/// Configuration for the decoding pipeline of one device connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Maximum bytes the frame reader will buffer while waiting for a line
    /// terminator. Exceeding it is fatal for the connection.
    pub max_line_length: usize,
    /// Partition that keypad status lines are attributed to. The keypad
    /// dialect carries no partition number; LRR messages do.
    pub default_partition: u32,
    /// Capacity of the diagnostics broadcast channel. Slow subscribers lose
    /// the oldest entries, never block the pipeline.
    pub diagnostic_capacity: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            max_line_length: 1024,
            default_partition: 1,
            diagnostic_capacity: 64,
        }
    }
}

impl DriverConfig {
    /// Create a new config builder starting from defaults.
    pub fn builder() -> DriverConfigBuilder {
        DriverConfigBuilder::default()
    }
}

/// Builder for DriverConfig.
#[derive(Debug, Clone, Default)]
pub struct DriverConfigBuilder {
    config: DriverConfig,
}

impl DriverConfigBuilder {
    pub fn max_line_length(mut self, bytes: usize) -> Self {
        self.config.max_line_length = bytes;
        self
    }

    pub fn default_partition(mut self, partition: u32) -> Self {
        self.config.default_partition = partition;
        self
    }

    pub fn diagnostic_capacity(mut self, capacity: usize) -> Self {
        self.config.diagnostic_capacity = capacity;
        self
    }

    pub fn build(self) -> DriverConfig {
        self.config
    }
}
