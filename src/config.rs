//! Configuration Module
//!
//! This module reads the limits applied while loading report files from environment
//! variables, falls back to sensible defaults, and validates the file size cap.

use anyhow::Result;
use std::env;

const MAX_FILE_SIZE_CAP: usize = 500_000_000;

#[derive(Debug, Clone)]
pub struct Config {
    pub max_file_size: usize,
    pub max_decompressed_size: usize,
    pub max_files_in_zip: usize,
    pub max_compression_ratio: f64,
    pub max_filename_length: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_file_size: 10 * 1024 * 1024,
            max_decompressed_size: 100 * 1024 * 1024,
            max_files_in_zip: 1000,
            max_compression_ratio: 1000.0,
            max_filename_length: 256,
        }
    }
}

impl Config {
    /// Creates a new configuration by reading environment variables.
    /// If a variable is missing or unparsable, the default value is used.
    pub fn new() -> Result<Self> {
        let defaults = Config::default();

        let max_file_size = env_or("DMARC_MAX_FILE_SIZE", defaults.max_file_size);
        if max_file_size > MAX_FILE_SIZE_CAP {
            return Err(anyhow::anyhow!("Max file size too large (500MB limit)"));
        }

        Ok(Config {
            max_file_size,
            max_decompressed_size: env_or(
                "DMARC_MAX_DECOMPRESSED_SIZE",
                defaults.max_decompressed_size,
            ),
            max_files_in_zip: env_or("DMARC_MAX_FILES_IN_ZIP", defaults.max_files_in_zip),
            max_compression_ratio: env_or(
                "DMARC_MAX_COMPRESSION_RATIO",
                defaults.max_compression_ratio,
            ),
            max_filename_length: env_or("DMARC_MAX_FILENAME_LENGTH", defaults.max_filename_length),
        })
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}
