//! Configuration types for runtime, output and puller settings

/// Runtime configuration for tokio and thread pools
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeConfig {
    /// Number of worker threads (0 = number of CPU cores)
    pub max_workers: usize,
    /// Number of blocking threads (0 = tokio default of 512)
    pub max_blocking_threads: usize,
}

/// Output and logging configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    /// Suppress error output
    pub quiet: bool,
    /// Verbosity level: 0=ERROR, 1=INFO, 2=DEBUG, 3=TRACE
    pub verbose: u8,
    /// Print summary statistics at the end
    pub print_summary: bool,
}

/// Default number of local copy workers per file
pub const DEFAULT_COPIERS: usize = 1;
/// Default number of network pull workers per file
pub const DEFAULT_PULLERS: usize = 16;
/// Default block size used when planning copy and pull operations
pub const DEFAULT_BLOCK_SIZE: u64 = 128 * 1024;
/// Mode used when creating missing destination directories
pub const DEFAULT_DIR_MODE: u32 = 0o755;
/// Mode used when creating temporary destination files
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Options read by the puller while reconstructing files
#[derive(Debug, Clone, Copy)]
pub struct PullerConfig {
    /// Maximum number of concurrent local block copies
    pub copiers: usize,
    /// Maximum number of concurrent block pulls
    pub pullers: usize,
    /// Block size (bytes)
    pub block_size: u64,
    /// Permission bits for directories created on the way to a temp file
    pub dir_mode: u32,
    /// Permission bits for newly created temp files
    pub file_mode: u32,
}

impl Default for PullerConfig {
    fn default() -> Self {
        Self {
            copiers: DEFAULT_COPIERS,
            pullers: DEFAULT_PULLERS,
            block_size: DEFAULT_BLOCK_SIZE,
            dir_mode: DEFAULT_DIR_MODE,
            file_mode: DEFAULT_FILE_MODE,
        }
    }
}

impl PullerConfig {
    /// Validate configuration and return errors if invalid
    pub fn validate(&self) -> Result<(), String> {
        if self.copiers == 0 {
            return Err("copiers must be greater than 0".to_string());
        }
        if self.pullers == 0 {
            return Err("pullers must be greater than 0".to_string());
        }
        if self.block_size == 0 {
            return Err("block_size must be greater than 0".to_string());
        }
        if self.dir_mode & 0o200 == 0 {
            return Err(format!(
                "dir_mode {:o} must allow the owner to write",
                self.dir_mode
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = PullerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dir_mode, 0o755);
        assert_eq!(config.file_mode, 0o644);
    }

    #[test]
    fn zero_widths_are_rejected() {
        let config = PullerConfig {
            copiers: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        let config = PullerConfig {
            pullers: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        let config = PullerConfig {
            block_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn read_only_dir_mode_is_rejected() {
        let config = PullerConfig {
            dir_mode: 0o555,
            ..Default::default()
        };
        let error = config.validate().unwrap_err();
        assert!(error.contains("555"), "unexpected error: {error}");
    }
}
