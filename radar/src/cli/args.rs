//! CLI argument definitions

use std::path::PathBuf;

use clap::Parser;

use crate::config::SensorConfig;
use crate::domain::SensorError;

#[derive(Parser, Debug)]
#[command(
    name = "radar",
    version,
    about = "Report file deletions on this host using an eBPF tracepoint",
    after_help = "\
EXAMPLES:
    sudo radar                                Use ./radar.o and defaults
    sudo radar --object /opt/radar/radar.o    Explicit probe object
    sudo radar --config radar.json --json     Config file, JSON lines on stdout"
)]
pub struct Args {
    /// JSON config file (missing keys keep their defaults)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Compiled probe object
    #[arg(short, long, value_name = "PATH")]
    pub object: Option<PathBuf>,

    /// Events buffered between the reader and the consumer
    #[arg(long, value_name = "N")]
    pub queue_capacity: Option<usize>,

    /// Perf buffer pages per CPU (power of two)
    #[arg(long, value_name = "N")]
    pub perf_pages: Option<usize>,

    /// Write every event to stdout as a JSON line
    #[arg(long)]
    pub json: bool,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Skip privilege, kernel and probe object checks
    #[arg(long)]
    pub skip_preflight: bool,
}

impl Args {
    /// Config file (if any) overlaid with command-line overrides, validated.
    ///
    /// # Errors
    /// Returns [`SensorError::Config`] if the file is unreadable or the
    /// result is invalid
    pub fn sensor_config(&self) -> Result<SensorConfig, SensorError> {
        let mut config = match &self.config {
            Some(path) => SensorConfig::from_file(path)?,
            None => SensorConfig::default(),
        };

        if let Some(object) = &self.object {
            config.object_path.clone_from(object);
        }
        if let Some(capacity) = self.queue_capacity {
            config.queue_capacity = capacity;
        }
        if let Some(pages) = self.perf_pages {
            config.perf_page_count = pages;
        }

        config.validate()?;
        Ok(config)
    }
}
