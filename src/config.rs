use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub marshal: MarshalConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarshalConfig {
    #[serde(default)]
    pub numeric_overflow: OverflowPolicy,
}

/// What happens when a number does not fit the native slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Wrap like a native integer cast
    #[default]
    Truncate,
    /// Fail with a range error
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default = "default_false")]
    pub json: bool,

    #[serde(default)]
    pub file: Option<String>,

    #[serde(default = "default_false")]
    pub spans: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
            file: None,
            spans: false,
        }
    }
}

fn default_level() -> String { "info".to_string() }
fn default_false() -> bool { false }

const CONFIG_FILE: &str = ".girbridge.toml";

impl BridgeConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config: {}", e))?;

        Self::parse(&content)
    }

    /// Parse configuration from TOML string
    pub fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content)
            .map_err(|e| format!("Failed to parse config: {}", e))
    }

    /// Find and load `.girbridge.toml` from the current directory or its parents,
    /// then apply environment overrides
    pub fn discover() -> Self {
        let mut current = std::env::current_dir().ok();
        let mut config = Self::default();

        while let Some(dir) = current {
            let config_path = dir.join(CONFIG_FILE);
            if config_path.exists() {
                if let Ok(found) = Self::load(&config_path) {
                    config = found;
                    break;
                }
            }
            current = dir.parent().map(|p| p.to_path_buf());
        }

        config.apply_env();
        config
    }

    /// GIR_BRIDGE_NUMERIC_OVERFLOW: truncate | error
    pub fn apply_env(&mut self) {
        if let Ok(policy) = std::env::var("GIR_BRIDGE_NUMERIC_OVERFLOW") {
            match policy.to_lowercase().as_str() {
                "truncate" => self.marshal.numeric_overflow = OverflowPolicy::Truncate,
                "error" => self.marshal.numeric_overflow = OverflowPolicy::Error,
                _ => {}
            }
        }
    }

    /// Generate default configuration file content
    pub fn generate_default() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate config"))
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        fs::write(path, content)
            .map_err(|e| format!("Failed to write config: {}", e))
    }
}
