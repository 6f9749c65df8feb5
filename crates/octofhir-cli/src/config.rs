use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ProfileConfig {
    pub endpoint: Option<String>,
    pub log_level: Option<String>,
}

impl ProfileConfig {
    /// Apply `config set <key> <value>`.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "endpoint" => self.endpoint = Some(value.to_string()),
            "log_level" => self.log_level = Some(value.to_string()),
            other => anyhow::bail!("Unknown config key: {other}. Valid keys: endpoint, log_level"),
        }
        Ok(())
    }
}

pub type ConfigFile = HashMap<String, ProfileConfig>;

pub(crate) fn config_dir() -> Result<PathBuf> {
    let dir = dirs::home_dir()
        .context("Cannot determine home directory")?
        .join(".octofhir");
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("live.toml"))
}

pub fn load_all() -> Result<ConfigFile> {
    let path = config_path()?;
    if !path.exists() {
        return Ok(ConfigFile::new());
    }
    let content = fs::read_to_string(&path)?;
    parse(&content).with_context(|| format!("Invalid config file {}", path.display()))
}

fn parse(content: &str) -> Result<ConfigFile> {
    Ok(toml::from_str(content)?)
}

pub fn load_profile(profile: &str) -> Result<ProfileConfig> {
    let mut all = load_all()?;
    Ok(all.remove(profile).unwrap_or_default())
}

pub fn save_profile(profile: &str, config: &ProfileConfig) -> Result<()> {
    let mut all = load_all()?;
    all.insert(profile.to_string(), config.clone());
    let content = toml::to_string_pretty(&all)?;
    fs::write(config_path()?, content)?;
    Ok(())
}

/// Endpoint precedence: flag/env, then profile, then stored credentials.
pub fn resolve_endpoint(cli_endpoint: &Option<String>, profile: &str) -> Result<Option<String>> {
    if let Some(e) = cli_endpoint {
        return Ok(Some(e.clone()));
    }
    if let Some(e) = load_profile(profile)?.endpoint {
        return Ok(Some(e));
    }
    if let Ok(Some(creds)) = crate::auth::load_credentials(profile) {
        return Ok(Some(creds.endpoint().to_string()));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_known_keys() {
        let mut cfg = ProfileConfig::default();
        cfg.set("endpoint", "wss://ehr.example.org/realtime").unwrap();
        cfg.set("log_level", "debug").unwrap();
        assert_eq!(cfg.endpoint.as_deref(), Some("wss://ehr.example.org/realtime"));
        assert_eq!(cfg.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_set_unknown_key_fails() {
        let mut cfg = ProfileConfig::default();
        let err = cfg.set("format", "json").unwrap_err();
        assert!(err.to_string().contains("Unknown config key"));
    }

    #[test]
    fn test_profiles_roundtrip_through_toml() {
        let mut all = ConfigFile::new();
        all.insert(
            "ward".into(),
            ProfileConfig {
                endpoint: Some("ws://localhost:8888/realtime".into()),
                log_level: None,
            },
        );
        let text = toml::to_string_pretty(&all).unwrap();
        let parsed = parse(&text).unwrap();
        assert_eq!(parsed.get("ward"), all.get("ward"));
    }
}
