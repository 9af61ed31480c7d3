//! Configuration access port trait.
//!
//! Implementors only supply raw strings; the typed getters parse them and
//! report unparsable values instead of silently falling back. A key that is
//! present with an empty value counts as missing.

use crate::domain::error::DeskError;

fn required(section: &str, key: &str, raw: Option<String>) -> Result<Option<String>, DeskError> {
    match raw {
        Some(value) if value.trim().is_empty() => Err(DeskError::ConfigMissing {
            section: section.to_string(),
            key: key.to_string(),
        }),
        other => Ok(other),
    }
}

pub trait ConfigPort {
    fn get_string(&self, section: &str, key: &str) -> Option<String>;

    fn get_int(&self, section: &str, key: &str) -> Result<Option<i64>, DeskError> {
        required(section, key, self.get_string(section, key))?
            .map(|raw| {
                raw.trim().parse::<i64>().map_err(|_| {
                    DeskError::config_invalid(section, key, format!("'{raw}' is not an integer"))
                })
            })
            .transpose()
    }

    fn get_double(&self, section: &str, key: &str) -> Result<Option<f64>, DeskError> {
        required(section, key, self.get_string(section, key))?
            .map(|raw| {
                raw.trim().parse::<f64>().map_err(|_| {
                    DeskError::config_invalid(section, key, format!("'{raw}' is not a number"))
                })
            })
            .transpose()
    }

    fn get_bool(&self, section: &str, key: &str) -> Result<Option<bool>, DeskError> {
        required(section, key, self.get_string(section, key))?
            .map(|raw| match raw.trim().to_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(true),
                "false" | "no" | "0" => Ok(false),
                _ => Err(DeskError::config_invalid(
                    section,
                    key,
                    format!("'{raw}' is not a boolean"),
                )),
            })
            .transpose()
    }
}
