//! INI file configuration adapter.
//!
//! Also serves the `[fundamentals]` section as a static fundamentals
//! snapshot.

use crate::domain::technical::Fundamentals;
use crate::ports::config_port::ConfigPort;
use crate::ports::signal_port::FundamentalsProvider;
use configparser::ini::Ini;
use std::path::Path;

pub struct FileConfigAdapter {
    config: Ini,
}

impl FileConfigAdapter {
    pub fn from_file<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let mut config = Ini::new();
        config.load(path).map_err(std::io::Error::other)?;
        Ok(Self { config })
    }

    pub fn from_string(content: &str) -> Result<Self, String> {
        let mut config = Ini::new();
        config.read(content.to_string())?;
        Ok(Self { config })
    }

    fn parse_bool(value: &str) -> Option<bool> {
        match value.to_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        }
    }
}

impl ConfigPort for FileConfigAdapter {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.config.get(section, key)
    }

    fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        self.config
            .getint(section, key)
            .ok()
            .flatten()
            .unwrap_or(default)
    }

    fn get_double(&self, section: &str, key: &str, default: f64) -> f64 {
        self.config
            .getfloat(section, key)
            .ok()
            .flatten()
            .unwrap_or(default)
    }

    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        self.config
            .get(section, key)
            .as_ref()
            .and_then(|v| Self::parse_bool(v))
            .unwrap_or(default)
    }

    fn keys(&self, section: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .config
            .get_map_ref()
            .get(&section.to_lowercase())
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

impl FundamentalsProvider for FileConfigAdapter {
    fn fundamentals(&self, _symbol: &str) -> Fundamentals {
        Fundamentals {
            current_price: self.get_double("fundamentals", "current_price", 0.0),
            week52_high: self.get_double("fundamentals", "week52_high", 0.0),
            week52_low: self.get_double("fundamentals", "week52_low", 0.0),
            debt_to_equity: self.get_double("fundamentals", "debt_to_equity", 0.0),
            roe: self.get_double("fundamentals", "roe", 0.0),
        }
    }
}
