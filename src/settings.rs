// =============================================================================
// Process Settings — environment-driven configuration with atomic save
// =============================================================================
//
// Everything the process needs before an agent exists: where to bind, which
// pair to trade by default, where the durable sink lives, and how to reach
// the advisor. Environment variables override the JSON file; every field
// carries a serde default so older files keep loading.
//
// Persistence uses a tmp + rename pattern so a crash mid-write cannot leave
// a torn file behind.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

fn default_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

fn default_symbol() -> String {
    "BTC-USD".to_string()
}

fn default_initial_capital() -> f64 {
    1000.0
}

fn default_sink_path() -> Option<String> {
    Some("vela_versions.db".to_string())
}

fn default_advisor_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_advisor_model() -> String {
    "gpt-4o-mini".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Default pair when a start request names none.
    #[serde(default = "default_symbol")]
    pub symbol: String,

    #[serde(default = "default_initial_capital")]
    pub initial_capital: f64,

    /// SQLite file for version snapshots; `None` disables the sink.
    #[serde(default = "default_sink_path")]
    pub sink_path: Option<String>,

    #[serde(default = "default_advisor_url")]
    pub advisor_url: String,

    #[serde(default = "default_advisor_model")]
    pub advisor_model: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            symbol: default_symbol(),
            initial_capital: default_initial_capital(),
            sink_path: default_sink_path(),
            advisor_url: default_advisor_url(),
            advisor_model: default_advisor_model(),
        }
    }
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings from {}", path.display()))?;
        let settings: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse settings from {}", path.display()))?;
        info!(path = %path.display(), "settings loaded");
        Ok(settings)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content =
            serde_json::to_string_pretty(self).context("failed to serialise settings")?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp settings to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp settings to {}", path.display()))?;
        info!(path = %path.display(), "settings saved");
        Ok(())
    }

    /// Apply `VELA_*` environment overrides on top of whatever was loaded.
    pub fn apply_env(mut self) -> Self {
        if let Ok(v) = std::env::var("VELA_BIND_ADDR") {
            if !v.is_empty() {
                self.bind_addr = v;
            }
        }
        if let Ok(v) = std::env::var("VELA_SYMBOL") {
            if !v.is_empty() {
                self.symbol = v.to_uppercase();
            }
        }
        if let Ok(v) = std::env::var("VELA_INITIAL_CAPITAL") {
            if let Ok(capital) = v.parse::<f64>() {
                self.initial_capital = capital;
            }
        }
        if let Ok(v) = std::env::var("VELA_SINK_PATH") {
            self.sink_path = if v.is_empty() { None } else { Some(v) };
        }
        if let Ok(v) = std::env::var("VELA_ADVISOR_URL") {
            if !v.is_empty() {
                self.advisor_url = v;
            }
        }
        if let Ok(v) = std::env::var("VELA_ADVISOR_MODEL") {
            if !v.is_empty() {
                self.advisor_model = v;
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let s = Settings::default();
        assert_eq!(s.symbol, "BTC-USD");
        assert_eq!(s.bind_addr, "0.0.0.0:3001");
        assert!(s.sink_path.is_some());
        assert!(s.initial_capital > 0.0);
    }

    #[test]
    fn empty_json_uses_defaults() {
        let s: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(s.symbol, "BTC-USD");
        assert_eq!(s.advisor_model, "gpt-4o-mini");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: Settings = serde_json::from_str(r#"{ "symbol": "ETH-USD" }"#).unwrap();
        assert_eq!(s.symbol, "ETH-USD");
        assert_eq!(s.bind_addr, "0.0.0.0:3001");
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut s = Settings::default();
        s.symbol = "SOL-USD".to_string();
        s.sink_path = None;
        s.save(&path).unwrap();

        let back = Settings::load(&path).unwrap();
        assert_eq!(back.symbol, "SOL-USD");
        assert!(back.sink_path.is_none());
    }
}
