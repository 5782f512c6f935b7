//! Configuration
//!
//! Layers, lowest priority first:
//! 1. Built-in defaults
//! 2. TOML file: explicit path, `CADENCE_CONFIG_PATH`, or `cadence.toml` if present
//! 3. Environment variables `CADENCE_<SECTION>__<KEY>` (e.g. `CADENCE_ENGINE__MAX_DEPTH`)
//! 4. Builder overrides

use anyhow::{bail, Context, Result};
use config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "cadence.toml";
pub const CONFIG_PATH_ENV: &str = "CADENCE_CONFIG_PATH";
const ENV_PREFIX: &str = "CADENCE";

/// How waits are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulingMode {
    /// Waits block the running thread
    #[default]
    Blocking,
    /// Waits suspend the execution and return it to the host
    Cooperative,
}

impl std::str::FromStr for SchedulingMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "blocking" => Ok(SchedulingMode::Blocking),
            "cooperative" => Ok(SchedulingMode::Cooperative),
            other => bail!("unknown scheduling mode '{}'", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub mode: SchedulingMode,
    /// Maximum number of nested contexts
    pub max_depth: usize,
    /// Cooperative time slice before a yield
    pub yield_interval_ms: u64,
    /// How long a paused cooperative execution stays suspended before polling
    pub pause_poll_ms: u64,
    /// Deepest script nesting level still recorded in command history
    pub history_level: usize,
    pub history: bool,
    pub quiet: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: SchedulingMode::Blocking,
            max_depth: 100,
            yield_interval_ms: 1000,
            pause_poll_ms: 100,
            history_level: 0,
            history: true,
            quiet: false,
        }
    }
}

impl EngineConfig {
    pub fn yield_interval(&self) -> Duration {
        Duration::from_millis(self.yield_interval_ms)
    }

    pub fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelConfig {
    /// Run group members on separate threads in blocking mode
    pub concurrent: bool,
    /// Give up on a member whose name stays locked this long
    pub lock_wait_ms: u64,
    pub lock_poll_ms: u64,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            concurrent: true,
            lock_wait_ms: 10_000,
            lock_poll_ms: 10,
        }
    }
}

impl ParallelConfig {
    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }

    pub fn lock_poll(&self) -> Duration {
        Duration::from_millis(self.lock_poll_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

/* ===================== Config ===================== */

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub parallel: ParallelConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load with default search rules
    pub fn load() -> Result<Self> {
        Self::builder().build()
    }

    /// Effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render configuration")
    }

    fn validate(&self) -> Result<()> {
        if self.engine.max_depth == 0 {
            bail!("engine.max_depth must be at least 1");
        }
        if self.parallel.lock_poll_ms == 0 {
            bail!("parallel.lock_poll_ms must be at least 1");
        }
        Ok(())
    }
}

/* ===================== Builder ===================== */

#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config_path: Option<PathBuf>,
    mode: Option<SchedulingMode>,
    max_depth: Option<usize>,
    quiet: Option<bool>,
    skip_env: bool,
}

impl ConfigBuilder {
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn mode(mut self, mode: Option<SchedulingMode>) -> Self {
        self.mode = mode;
        self
    }

    pub fn max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn quiet(mut self, quiet: Option<bool>) -> Self {
        self.quiet = quiet;
        self
    }

    /// Ignore `CADENCE_*` environment variables
    pub fn without_env(mut self) -> Self {
        self.skip_env = true;
        self
    }

    pub fn build(self) -> Result<Config> {
        let defaults = toml::to_string(&Config::default())
            .context("Failed to render default configuration")?;
        let mut builder =
            config::Config::builder().add_source(File::from_str(&defaults, FileFormat::Toml));

        let explicit = self
            .config_path
            .clone()
            .or_else(|| std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from));
        builder = match &explicit {
            Some(path) => {
                if !path.exists() {
                    bail!("Config file not found: {}", path.display());
                }
                builder.add_source(File::from(path.as_path()).format(FileFormat::Toml))
            }
            None => builder.add_source(
                File::new(DEFAULT_CONFIG_FILE, FileFormat::Toml).required(false),
            ),
        };

        if !self.skip_env {
            builder = builder.add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let mut config: Config = builder
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        if let Some(mode) = self.mode {
            config.engine.mode = mode;
        }
        if let Some(max_depth) = self.max_depth {
            config.engine.max_depth = max_depth;
        }
        if let Some(quiet) = self.quiet {
            config.engine.quiet = quiet;
        }

        config.validate()?;
        Ok(config)
    }
}
