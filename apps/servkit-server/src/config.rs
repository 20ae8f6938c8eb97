//! Layered application configuration: defaults, then an optional YAML file,
//! then `SERVKIT__`-prefixed environment variables.

use std::path::Path;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app_name: String,
    pub primary_port: u16,
    pub health_port: u16,
    pub exit_signals: Vec<String>,
    /// Fallback tracing filter when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_name: "servkit-server".to_owned(),
            primary_port: 3000,
            health_port: 5678,
            exit_signals: vec!["SIGINT".to_owned(), "SIGTERM".to_owned()],
            log_filter: "info".to_owned(),
        }
    }
}

/// Loads configuration with later layers overriding earlier ones.
///
/// # Errors
/// Unreadable YAML or malformed values.
pub fn load_layered(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
    if let Some(path) = path {
        figment = figment.merge(Yaml::file(path));
    }
    figment = figment.merge(Env::prefixed("SERVKIT__").split("__"));
    Ok(figment.extract()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_without_file_or_env() {
        let cfg = load_layered(None).unwrap();
        assert_eq!(cfg.app_name, "servkit-server");
        assert_eq!(cfg.primary_port, 3000);
        assert_eq!(cfg.health_port, 5678);
    }

    #[test]
    fn yaml_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::with_suffix(".yaml").unwrap();
        writeln!(file, "app_name: billing\nprimary_port: 8080").unwrap();

        let cfg = load_layered(Some(file.path())).unwrap();
        assert_eq!(cfg.app_name, "billing");
        assert_eq!(cfg.primary_port, 8080);
        // untouched keys keep their defaults
        assert_eq!(cfg.health_port, 5678);
    }

    #[test]
    fn env_overrides_yaml() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("config.yaml", "primary_port: 8080")?;
            jail.set_env("SERVKIT__PRIMARY_PORT", "9090");
            jail.set_env("SERVKIT__APP_NAME", "edge");

            let cfg = load_layered(Some(Path::new("config.yaml"))).unwrap();
            assert_eq!(cfg.primary_port, 9090);
            assert_eq!(cfg.app_name, "edge");
            Ok(())
        });
    }
}
