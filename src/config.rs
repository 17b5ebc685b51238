use crate::errors::{BridgeError, Result};
use crate::infrastructure::logging::{LogConfig, LogFormat, LogOutput};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::Level;

pub const CONFIG_FILE_NAME: &str = "pybridge.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Module imported by `Bridge::with_config`.
    #[serde(default = "default_module")]
    pub module: String,

    /// Directories prepended to `sys.path` before the import.
    #[serde(default)]
    pub search_paths: Vec<PathBuf>,

    #[serde(default)]
    pub array_interop: ArrayInterop,

    /// Finalize the interpreter on shutdown if the bridge started it. On by
    /// default; a finalized interpreter cannot be started again in-process.
    #[serde(default = "default_finalize")]
    pub finalize_on_shutdown: bool,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// How native arrays are presented to Python.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArrayInterop {
    /// numpy arrays when numpy imports, memoryviews otherwise.
    Auto,
    /// numpy arrays; startup fails without numpy.
    Numpy,
    /// Plain shaped memoryviews.
    Memoryview,
}

impl Default for ArrayInterop {
    fn default() -> Self {
        ArrayInterop::Auto
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default = "default_format")]
    pub format: String,

    /// Log to daily-rotated files in this directory instead of stderr.
    #[serde(default)]
    pub directory: Option<PathBuf>,

    #[serde(default)]
    pub span_events: bool,

    #[serde(default)]
    pub filter: Option<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            module: default_module(),
            search_paths: Vec::new(),
            array_interop: ArrayInterop::default(),
            finalize_on_shutdown: default_finalize(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: default_format(),
            directory: None,
            span_events: false,
            filter: None,
        }
    }
}

fn default_module() -> String { "bridge_main".to_string() }
fn default_finalize() -> bool { true }
fn default_level() -> String { "info".to_string() }
fn default_format() -> String { "pretty".to_string() }

impl BridgeConfig {
    pub fn for_module(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            ..Self::default()
        }
    }

    pub fn with_search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_paths.push(path.into());
        self
    }

    pub fn with_array_interop(mut self, interop: ArrayInterop) -> Self {
        self.array_interop = interop;
        self
    }

    pub fn with_finalize_on_shutdown(mut self, finalize: bool) -> Self {
        self.finalize_on_shutdown = finalize;
        self
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| BridgeError::config(format!("Failed to read {}: {}", path.display(), e)))?;

        Self::parse(&content)
    }

    /// Parse configuration from TOML string
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| BridgeError::config(format!("Failed to parse config: {}", e)))
    }

    /// Find `pybridge.toml` in the current directory or its parents.
    pub fn discover() -> Self {
        match std::env::current_dir() {
            Ok(dir) => Self::discover_from(&dir),
            Err(_) => Self::default(),
        }
    }

    /// Find `pybridge.toml` in `start` or its parents. A file that fails to
    /// load is skipped; defaults apply when none is found.
    pub fn discover_from(start: &Path) -> Self {
        let mut current = Some(start.to_path_buf());

        while let Some(dir) = current {
            let config_path = dir.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                if let Ok(config) = Self::load(&config_path) {
                    return config;
                }
            }
            current = dir.parent().map(|p| p.to_path_buf());
        }

        Self::default()
    }

    /// Apply `PYBRIDGE_MODULE` and `PYBRIDGE_PATH` on top of the file settings.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(module) = std::env::var("PYBRIDGE_MODULE") {
            if !module.is_empty() {
                self.module = module;
            }
        }
        if let Some(paths) = std::env::var_os("PYBRIDGE_PATH") {
            self.search_paths.extend(std::env::split_paths(&paths));
        }
        self
    }

    pub fn generate_default() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate config"))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| BridgeError::config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, content)
            .map_err(|e| BridgeError::config(format!("Failed to write {}: {}", path.display(), e)))
    }
}

impl LoggingConfig {
    pub fn to_log_config(&self) -> Result<LogConfig> {
        let level: Level = self
            .level
            .parse()
            .map_err(|_| BridgeError::config(format!("Unknown log level: {}", self.level)))?;

        let format = match self.format.to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            "json" => LogFormat::Json,
            other => return Err(BridgeError::config(format!("Unknown log format: {}", other))),
        };

        let output = match &self.directory {
            Some(dir) => LogOutput::File {
                directory: dir.to_string_lossy().into_owned(),
                prefix: "pybridge".to_string(),
            },
            None => LogOutput::Stderr,
        };

        let mut config = LogConfig::new()
            .with_level(level)
            .with_format(format)
            .with_output(output)
            .with_span_events(self.span_events);
        if let Some(filter) = &self.filter {
            config = config.with_filter(filter.clone());
        }
        Ok(config)
    }
}
