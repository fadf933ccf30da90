//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! The extraction API key is referenced by env-var name in the config and
//! resolved at runtime into a `SecretString`.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::net::SocketAddr;

use crate::types::{
    GlobalSettings, Plant, DEFAULT_PROGRAMMED_MW, DEFAULT_RPF_PERCENT, DEFAULT_RSF_PERCENT,
};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub plant: Plant,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    /// Extraction provider. Without this section the Gemini defaults apply,
    /// and extraction stays off unless `API_KEY` is set.
    #[serde(default)]
    pub llm: LlmConfig,
    pub dashboard: DashboardConfig,
}

/// Values the session starts with.
#[derive(Debug, Deserialize, Clone)]
pub struct DefaultsConfig {
    #[serde(default = "default_rpf")]
    pub rpf_percent: f64,
    #[serde(default = "default_rsf")]
    pub rsf_percent: f64,
    #[serde(default = "default_programmed")]
    pub programmed_mw: f64,
    /// Initial load per unit id. Units not listed start at 0%.
    #[serde(default)]
    pub loads: HashMap<String, f64>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            rpf_percent: DEFAULT_RPF_PERCENT,
            rsf_percent: DEFAULT_RSF_PERCENT,
            programmed_mw: DEFAULT_PROGRAMMED_MW,
            loads: HashMap::new(),
        }
    }
}

impl DefaultsConfig {
    pub fn globals(&self) -> GlobalSettings {
        GlobalSettings {
            rpf_percent: self.rpf_percent,
            rsf_percent: self.rsf_percent,
            programmed_mw: self.programmed_mw,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// "gemini" | "openai"
    pub provider: String,
    pub model: String,
    pub api_key_env: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Override of the provider endpoint root (proxies, local testing).
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            model: "gemini-3-flash-preview".to_string(),
            api_key_env: "API_KEY".to_string(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout(),
            base_url: None,
        }
    }
}

impl LlmConfig {
    /// Look up the API key. `None` when the variable is unset or empty.
    pub fn api_key(&self) -> Option<SecretString> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::new)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    /// Request body cap for image uploads.
    #[serde(default = "default_max_upload")]
    pub max_upload_bytes: usize,
}

impl DashboardConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid dashboard address {}:{}", self.host, self.port))
    }
}

fn default_rpf() -> f64 {
    DEFAULT_RPF_PERCENT
}
fn default_rsf() -> f64 {
    DEFAULT_RSF_PERCENT
}
fn default_programmed() -> f64 {
    DEFAULT_PROGRAMMED_MW
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_timeout() -> u64 {
    120
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_max_upload() -> usize {
    10 * 1024 * 1024
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse configuration from TOML text.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        anyhow::ensure!(!config.plant.units.is_empty(), "plant.units must not be empty");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    const MINIMAL: &str = r#"
        [llm]
        provider = "gemini"
        model = "gemini-3-flash-preview"
        api_key_env = "REGMARGIN_TEST_UNSET_KEY"

        [dashboard]
        port = 8080
    "#;

    #[test]
    fn test_load_config() {
        // Requires config.toml in the working directory (the crate root under cargo test).
        let result = AppConfig::load("config.toml");
        if let Ok(cfg) = result {
            assert_eq!(cfg.plant.units.len(), 5);
            assert_eq!(cfg.plant.max_mw_per_unit, 18.4);
            assert_eq!(cfg.defaults.loads.get("g4"), Some(&90.0));
            assert_eq!(cfg.llm.provider, "gemini");
            assert_eq!(cfg.dashboard.port, 8080);
        }
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg = AppConfig::parse(MINIMAL).unwrap();
        assert_eq!(cfg.plant, Plant::default());
        assert_eq!(cfg.defaults.globals(), GlobalSettings::default());
        assert!(cfg.defaults.loads.is_empty());
        assert_eq!(cfg.llm.max_tokens, 1024);
        assert_eq!(cfg.llm.timeout_secs, 120);
        assert!(cfg.llm.base_url.is_none());
        assert_eq!(cfg.dashboard.host, "0.0.0.0");
        assert_eq!(cfg.dashboard.max_upload_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn test_custom_plant() {
        let toml = format!(
            r#"
            [plant]
            max_mw_per_unit = 20.0

            [[plant.units]]
            id = "u1"
            name = "Unit 1"
            max_mw = 25.0
            {MINIMAL}"#
        );
        let cfg = AppConfig::parse(&toml).unwrap();
        assert_eq!(cfg.plant.units.len(), 1);
        assert_eq!(cfg.plant.max_mw_for(&cfg.plant.units[0]), 25.0);
        assert_eq!(cfg.plant.in_range_tolerance_pct, 10.0);
    }

    #[test]
    fn test_empty_unit_list_rejected() {
        let toml = format!("[plant]\nunits = []\n{MINIMAL}");
        assert!(AppConfig::parse(&toml).is_err());
    }

    #[test]
    fn test_missing_llm_section_uses_gemini_defaults() {
        let cfg = AppConfig::parse("[dashboard]\nport = 1\n").unwrap();
        assert_eq!(cfg.llm.provider, "gemini");
        assert_eq!(cfg.llm.model, "gemini-3-flash-preview");
        assert_eq!(cfg.llm.api_key_env, "API_KEY");
        assert_eq!(cfg.llm.max_tokens, 1024);
        assert_eq!(cfg.dashboard.port, 1);
    }

    #[test]
    fn test_missing_dashboard_section_rejected() {
        let toml = "[llm]\nprovider = \"gemini\"\nmodel = \"m\"\napi_key_env = \"K\"\n";
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_socket_addr() {
        let cfg = AppConfig::parse(MINIMAL).unwrap();
        assert_eq!(cfg.dashboard.socket_addr().unwrap().port(), 8080);
    }

    #[test]
    fn test_api_key_resolution() {
        let mut cfg = AppConfig::parse(MINIMAL).unwrap();
        assert!(cfg.llm.api_key().is_none());

        cfg.llm.api_key_env = "REGMARGIN_TEST_SET_KEY".into();
        std::env::set_var("REGMARGIN_TEST_SET_KEY", "secret-value");
        let key = cfg.llm.api_key().unwrap();
        assert_eq!(key.expose_secret(), "secret-value");
    }
}
