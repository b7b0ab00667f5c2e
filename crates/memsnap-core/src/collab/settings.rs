use std::fs;
use std::path::Path;

use crate::error::Result;

/// Read-only view of user settings. Keys are dotted, e.g. `snapshot.batch_ceiling`.
pub trait SettingsOracle {
    fn get_bool(&self, key: &str) -> Option<bool>;
    fn get_number(&self, key: &str) -> Option<f64>;
    fn get_text(&self, key: &str) -> Option<String>;
}

/// Settings backed by a TOML document.
#[derive(Debug, Clone, Default)]
pub struct TomlSettings {
    table: toml::Table,
}

impl TomlSettings {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(Self {
            table: text.parse::<toml::Table>()?,
        })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::parse(&fs::read_to_string(path)?)
    }

    fn lookup(&self, key: &str) -> Option<&toml::Value> {
        let mut parts = key.split('.');
        let mut value = self.table.get(parts.next()?)?;
        for part in parts {
            value = value.as_table()?.get(part)?;
        }
        Some(value)
    }
}

impl SettingsOracle for TomlSettings {
    fn get_bool(&self, key: &str) -> Option<bool> {
        self.lookup(key)?.as_bool()
    }

    fn get_number(&self, key: &str) -> Option<f64> {
        match self.lookup(key)? {
            toml::Value::Integer(i) => Some(*i as f64),
            toml::Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    fn get_text(&self, key: &str) -> Option<String> {
        self.lookup(key)?.as_str().map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_settings_lookup() {
        let settings = TomlSettings::parse(
            r#"
[snapshot]
batch_ceiling = 4096
strict = false
transport = "image"
deadline_secs = 2.5
"#,
        )
        .unwrap();
        assert_eq!(settings.get_number("snapshot.batch_ceiling"), Some(4096.0));
        assert_eq!(settings.get_number("snapshot.deadline_secs"), Some(2.5));
        assert_eq!(settings.get_bool("snapshot.strict"), Some(false));
        assert_eq!(settings.get_text("snapshot.transport").as_deref(), Some("image"));
        assert_eq!(settings.get_bool("snapshot.transport"), None);
        assert_eq!(settings.get_number("missing.key"), None);
    }

    #[test]
    fn test_toml_settings_rejects_invalid() {
        assert!(TomlSettings::parse("not = = toml").is_err());
    }
}
