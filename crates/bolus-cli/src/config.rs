//! Configuration file support

use bolus_agent::ClinicalProfile;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_TEMPERATURE: f32 = 0.6;
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 5;

/// Configuration for bolus
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Gemini model id
    pub model: Option<String>,
    /// API key (alternative to GOOGLE_API_KEY / GEMINI_API_KEY)
    pub api_key: Option<String>,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Tool rounds allowed per message
    pub max_tool_rounds: Option<usize>,
    /// JSON array of foods for nutrition lookups
    pub nutrition_file: Option<String>,
    /// Where thread checkpoints are stored
    pub checkpoint_dir: Option<String>,
    /// Personal dosing constants
    pub profile: ClinicalProfile,
    /// Nightscout health-data server
    pub nightscout: Option<NightscoutConfig>,
}

/// Nightscout connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NightscoutConfig {
    pub url: String,
    /// Access token sent as the `token` query parameter
    pub token: Option<String>,
    /// Hashed API secret sent as the `api-secret` header
    pub api_secret: Option<String>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("bolus")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("BOLUS_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    /// Save config to file
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            model: Some(DEFAULT_MODEL.to_string()),
            temperature: Some(DEFAULT_TEMPERATURE),
            max_tool_rounds: Some(DEFAULT_MAX_TOOL_ROUNDS),
            ..Default::default()
        };

        default_config.save()?;
        Ok(path)
    }

    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    pub fn temperature(&self) -> f32 {
        self.temperature.unwrap_or(DEFAULT_TEMPERATURE)
    }

    pub fn max_tool_rounds(&self) -> usize {
        self.max_tool_rounds.unwrap_or(DEFAULT_MAX_TOOL_ROUNDS)
    }

    /// API key from config, then the environment
    pub fn api_key(&self) -> Option<String> {
        bolus_ai::providers::get_api_key(
            self.api_key.as_deref(),
            bolus_ai::providers::google::API_KEY_ENV_VARS,
        )
        .ok()
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        match &self.checkpoint_dir {
            Some(dir) => PathBuf::from(dir),
            None => dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("bolus")
                .join("threads"),
        }
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# bolus configuration file
# Place at ~/.config/bolus/config.toml (Linux/Mac) or %APPDATA%\bolus\config.toml (Windows)

# Gemini model to use
model = "gemini-2.5-flash"

# Sampling temperature
temperature = 0.6

# Nutrition lookups allowed per message before the assistant must ask you
max_tool_rounds = 5

# JSON array of foods: [{"food_name": "...", "carbs_per_100g": 20.0, ...}]
# nutrition_file = "~/.config/bolus/foods.json"

# Where conversations are stored between runs
# checkpoint_dir = "~/.local/share/bolus/threads"

# API key (optional - GOOGLE_API_KEY or GEMINI_API_KEY also work)
# api_key = "..."

# Personal dosing constants. Agree these with your care team.
[profile]
icr = 6.5                   # grams of carbohydrate per unit
correction_factor = 35.0    # mg/dL drop per unit
target = 120.0              # mg/dL
correction_threshold = 155.0
carb_digest_rate = 20.0     # grams digested per hour

# Glucose and treatment history
# [nightscout]
# url = "https://my-site.herokuapp.com"
# token = "readable-abc123"
"#
}
