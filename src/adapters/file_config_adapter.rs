//! INI file configuration adapter with environment overrides.
//!
//! `RISKDESK_<SECTION>_<KEY>` overrides `[section] key` from the file, e.g.
//! `RISKDESK_RISK_CAPITAL=50000`. Section names must not contain `_`.

use crate::domain::error::DeskError;
use crate::ports::config_port::ConfigPort;
use configparser::ini::Ini;
use std::collections::HashMap;
use std::path::Path;

pub const ENV_PREFIX: &str = "RISKDESK_";

#[derive(Debug)]
pub struct FileConfigAdapter {
    config: Ini,
    overrides: HashMap<(String, String), String>,
}

impl FileConfigAdapter {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, DeskError> {
        let mut config = Ini::new();
        config.load(path.as_ref()).map_err(|reason| DeskError::ConfigParse {
            file: path.as_ref().display().to_string(),
            reason,
        })?;
        Ok(Self {
            config,
            overrides: HashMap::new(),
        })
    }

    pub fn from_string(content: &str) -> Result<Self, DeskError> {
        let mut config = Ini::new();
        config
            .read(content.to_string())
            .map_err(|reason| DeskError::ConfigParse {
                file: "<inline>".to_string(),
                reason,
            })?;
        Ok(Self {
            config,
            overrides: HashMap::new(),
        })
    }

    /// No file at all: every key comes from the environment or defaults.
    pub fn empty() -> Self {
        Self {
            config: Ini::new(),
            overrides: HashMap::new(),
        }
    }

    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(std::env::vars())
    }

    /// Layer `RISKDESK_*` variables over the file. Other variables are ignored.
    pub fn with_overrides<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            let Some(rest) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let Some((section, key)) = rest.split_once('_') else {
                continue;
            };
            if section.is_empty() || key.is_empty() {
                continue;
            }
            self.overrides
                .insert((section.to_lowercase(), key.to_lowercase()), value);
        }
        self
    }
}

impl ConfigPort for FileConfigAdapter {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.overrides
            .get(&(section.to_lowercase(), key.to_lowercase()))
            .cloned()
            .or_else(|| self.config.get(section, key))
    }
}
