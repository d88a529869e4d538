//! Configuration types for the decoy server.

mod imposter;
mod protocol;

use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub use imposter::ImposterConfig;
pub use protocol::{Mode, Protocol};

fn default_host() -> String {
    "0.0.0.0".to_string()
}

/// Server configuration file.
///
/// JSON files are accepted as well since JSON is a subset of YAML.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Default bind address for imposters without an explicit host.
    #[serde(default = "default_host")]
    pub host: String,
    /// Enables `inject`, `decorate`, `shellTransform` and function `wait`.
    #[serde(default)]
    pub allow_injection: bool,
    #[serde(default)]
    pub imposters: Vec<ImposterConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            allow_injection: false,
            imposters: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: ServerConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.host.trim().is_empty() {
            anyhow::bail!("'host' must not be empty");
        }

        let mut ports = HashSet::new();
        for (index, imposter) in self.imposters.iter().enumerate() {
            if !imposter.protocol.is_supported() {
                anyhow::bail!(
                    "imposters[{index}]: unsupported protocol '{}'. Supported: http, tcp, smtp",
                    imposter.protocol
                );
            }
            if let Some(port) = imposter.port {
                if port == 0 {
                    anyhow::bail!("imposters[{index}]: port 0 is reserved, omit 'port' instead");
                }
                if !ports.insert(port) {
                    anyhow::bail!("imposters[{index}]: port {port} is used by more than one imposter");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_server_config_from_yaml() {
        let yaml = r#"
allowInjection: true
imposters:
  - protocol: tcp
    port: 4545
    stubs:
      - predicates:
          - equals: { data: client }
        responses:
          - is: { data: server }
"#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let config = ServerConfig::from_file(file.path()).unwrap();
        assert!(config.allow_injection);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.imposters.len(), 1);
        assert_eq!(config.imposters[0].protocol, Protocol::Tcp);
    }

    #[test]
    fn test_server_config_from_json() {
        let json = r#"{"imposters": [{"protocol": "http", "port": 4546}]}"#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let config = ServerConfig::from_file(file.path()).unwrap();
        assert!(!config.allow_injection);
        assert_eq!(config.imposters[0].port, Some(4546));
    }

    #[test]
    fn test_duplicate_ports_rejected() {
        let config = ServerConfig {
            imposters: vec![
                ImposterConfig::new(Protocol::Http).with_port(5000),
                ImposterConfig::new(Protocol::Tcp).with_port(5000),
            ],
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("port 5000"));
    }

    #[test]
    fn test_https_rejected() {
        let config = ServerConfig {
            imposters: vec![ImposterConfig::new(Protocol::Https).with_port(5001)],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
