use crate::server::telemetry::LogFormat;
use anyhow::{Context, bail};
use clap::Parser;
use logfan_core::RunDefaults;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Runtime configuration for the `logfan-server` binary.
///
/// These settings control where the control plane listens, where source and
/// output files live, and the defaults applied to `/start` requests that omit
/// a field. All values are parsed from CLI arguments or environment variables
/// (a `.env` file is loaded first), with defaults suitable for a local demo.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "logfan-server",
    version,
    about = "Streams a log file in chunks and fans every chunk out to concurrent emitters"
)]
pub struct CliArgs {
    /// Address the HTTP control plane listens on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:8080"))]
    pub server_addr: String,

    /// Directory holding the source log files named by `primaryLogFile`.
    ///
    /// Environment variable: `LOG_DIR`
    #[arg(long, env = "LOG_DIR", default_value = "./log-files")]
    pub log_dir: PathBuf,

    /// Directory where file-mode runs create their output file. Defaults to
    /// `LOG_DIR`.
    ///
    /// Environment variable: `OUTPUT_DIR`
    #[arg(long, env = "OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Optional JSON file overriding the run defaults below. Accepts the keys
    /// `chunkSize`, `workers`, `fileName`, `split` and `delay`.
    ///
    /// Environment variable: `CONFIG_FILE`
    #[arg(long, env = "CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Chunk size in bytes used when a start request omits `chunk`.
    ///
    /// Environment variable: `DEFAULT_CHUNK_SIZE`
    #[arg(long, env = "DEFAULT_CHUNK_SIZE", default_value_t = 4096)]
    pub default_chunk_size: usize,

    /// Emitters per chunk used when a start request omits `workers`.
    ///
    /// Environment variable: `DEFAULT_WORKERS`
    #[arg(long, env = "DEFAULT_WORKERS", default_value_t = 4)]
    pub default_workers: usize,

    /// Per-emitter delay in seconds used when a start request omits `delay`.
    ///
    /// Environment variable: `DEFAULT_DELAY`
    #[arg(long, env = "DEFAULT_DELAY", default_value_t = 0.0)]
    pub default_delay: f64,

    /// Source file used when a start request omits `primaryLogFile`.
    ///
    /// Environment variable: `DEFAULT_FILE`
    #[arg(long, env = "DEFAULT_FILE", default_value_t = String::from("part_aa.log"))]
    pub default_file: String,

    /// Split chunks across emitters instead of replicating them, when a start
    /// request omits `split`.
    ///
    /// Environment variable: `DEFAULT_SPLIT`
    #[arg(long, env = "DEFAULT_SPLIT", default_value_t = false)]
    pub default_split: bool,

    /// Console log format.
    ///
    /// Environment variable: `LOG_FORMAT`
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

/// Run defaults read from a JSON file. Every key is optional.
#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFile {
    pub chunk_size: Option<usize>,
    pub workers: Option<usize>,
    pub file_name: Option<String>,
    pub split: Option<bool>,
    pub delay: Option<f64>,
}

impl ConfigFile {
    /// Reads `path`, returning `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Option<Self>> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("reading {}", path.display()));
            }
        };
        let parsed = serde_json::from_str(&raw)
            .with_context(|| format!("decoding configuration file {}", path.display()))?;
        Ok(Some(parsed))
    }

    fn apply(self, defaults: &mut RunDefaults) {
        if let Some(chunk_size) = self.chunk_size {
            defaults.chunk_size = chunk_size;
        }
        if let Some(workers) = self.workers {
            defaults.workers = workers;
        }
        if let Some(file_name) = self.file_name {
            defaults.source = file_name;
        }
        if let Some(split) = self.split {
            defaults.split = split;
        }
        if let Some(delay) = self.delay {
            defaults.delay_secs = delay;
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub log_dir: PathBuf,
    pub output_dir: PathBuf,
    pub defaults: RunDefaults,
    pub log_format: LogFormat,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let mut defaults = RunDefaults {
            chunk_size: args.default_chunk_size,
            workers: args.default_workers,
            delay_secs: args.default_delay,
            source: args.default_file,
            split: args.default_split,
        };

        if let Some(path) = &args.config_file {
            match ConfigFile::load(path)? {
                Some(file) => file.apply(&mut defaults),
                None => tracing::info!(
                    "Configuration file {} not found, using default values",
                    path.display()
                ),
            }
        }

        if defaults.chunk_size == 0 {
            bail!("DEFAULT_CHUNK_SIZE must be greater than 0");
        }

        if defaults.workers == 0 {
            bail!("DEFAULT_WORKERS must be greater than 0");
        }

        if !defaults.delay_secs.is_finite() || defaults.delay_secs < 0.0 {
            bail!(
                "DEFAULT_DELAY must be a non-negative number of seconds, got {}",
                defaults.delay_secs
            );
        }

        let output_dir = args.output_dir.unwrap_or_else(|| args.log_dir.clone());

        Ok(Self {
            server_addr: args.server_addr,
            log_dir: args.log_dir,
            output_dir,
            defaults,
            log_format: args.log_format,
        })
    }
}
