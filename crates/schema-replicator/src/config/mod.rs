//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::Result;
use std::path::Path;

impl Config {
    /// Load configuration from a file.
    ///
    /// `.json` files are parsed as JSON, anything else as YAML.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if is_json {
            Self::from_json(&content)
        } else {
            Self::from_yaml(&content)
        }
    }

    /// Parse configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::Dbms;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const JSON_CONFIG: &str = r#"{
        "replicated_connection": {
            "HOST": "primary.local",
            "PORT": "3306",
            "USER": "repl",
            "PASSWORD": "secret",
            "DATABASE": ["shop"],
            "TABLE": [],
            "DBMS": "MySQL"
        },
        "other_connections": [
            {"HOST": "replica.local", "PORT": 3307, "USER": "repl", "PASSWORD": "secret", "DATABASE": null, "DBMS": "mysql"}
        ]
    }"#;

    #[test]
    fn test_from_json_with_upper_case_keys() {
        let config = Config::from_json(JSON_CONFIG).unwrap();
        assert_eq!(config.replicated_connection.host, "primary.local");
        assert_eq!(config.replicated_connection.port, 3306);
        assert_eq!(config.replicated_connection.databases, vec!["shop"]);
        assert_eq!(config.replicated_connection.dbms().unwrap(), Dbms::Mysql);

        let target = &config.other_connections[0];
        assert_eq!(target.port, 3307);
        assert!(target.databases.is_empty());
        assert!(target.tables.is_empty());

        assert_eq!(config.settings.statement_timeout_secs, 30);
        assert!(config.settings.parallel_targets);
    }

    #[test]
    fn test_from_yaml_with_settings() {
        let yaml = r#"
replicated_connection:
  HOST: primary.local
  USER: repl
  DBMS: mariadb
other_connections:
  - label: staging
    HOST: staging.local
    USER: repl
    DBMS: MARIADB
settings:
  max_retries: 5
  parallel_targets: false
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.replicated_connection.port, 3306);
        assert_eq!(config.other_connections[0].display_label(), "staging");
        assert_eq!(config.settings.max_retries, 5);
        assert!(!config.settings.parallel_targets);
    }

    #[test]
    fn test_load_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(JSON_CONFIG.as_bytes()).unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.other_connections.len(), 1);
    }

    #[test]
    fn test_load_rejects_unknown_dbms() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(
            br#"
replicated_connection: {HOST: a, USER: u, DBMS: oracle}
other_connections: [{HOST: b, USER: u, DBMS: mysql}]
"#,
        )
        .unwrap();
        let err = Config::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("oracle"));
    }

    #[test]
    fn test_invalid_port_string() {
        let json = JSON_CONFIG.replace("\"3306\"", "\"abc\"");
        assert!(Config::from_json(&json).is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(Config::load("/nonexistent/connections.json").is_err());
    }
}
