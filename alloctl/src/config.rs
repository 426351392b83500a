//! Service configuration.
//!
//! Configuration is read from a YAML file (default `config.yaml`, override with `-f` or
//! `ALLOCTL_CONFIG`) and then from `ALLOCTL_`-prefixed environment variables, which win. Nested
//! keys are separated by a double underscore:
//!
//! ```bash
//! ALLOCTL_PORT=8080
//! ALLOCTL_DEFAULT_RESOURCE_TYPE=VENTILATOR
//! ALLOCTL_SCHEDULER__INTERVAL=10s
//! ALLOCTL_ENABLE_METRICS=true
//! ```
//!
//! Every field has a default, so an empty or missing file yields a working service seeded with
//! three `ICU_BED` and two `VENTILATOR` resources.
//!
//! ```no_run
//! use clap::Parser;
//! use alloctl::config::{Args, Config};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let args = Args::parse();
//! let config = Config::load(&args)?;
//! println!("Listening on {}", config.bind_address());
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::engine::EngineConfig;
use crate::types::ResourceType;

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "ALLOCTL_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Resource type given to requests that do not name one. Must be one of the seeded types.
    pub default_resource_type: String,
    /// Resources registered at startup
    pub resources: Vec<ResourceSeed>,
    pub scheduler: SchedulerConfig,
    pub cors: CorsConfig,
    /// Expose Prometheus metrics at `/internal/metrics`
    pub enable_metrics: bool,
    /// Export traces over OTLP (see [`crate::telemetry`])
    pub enable_otel_export: bool,
}

/// A batch of identical resources created at startup, labelled `{resource_type}-{n}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceSeed {
    pub resource_type: String,
    pub count: usize,
}

/// Background sweep that ages waiting requests and retries matching.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// Time between sweeps
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Waiting time that earns a request one priority step. `null` disables aging.
    #[serde(with = "humantime_serde")]
    pub aging_interval: Option<Duration>,
}

/// CORS settings for the browser client.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    pub allowed_origins: Vec<CorsOrigin>,
    /// Cache preflight requests for this many seconds
    pub max_age: Option<u64>,
}

/// CORS origin: `*` or a specific URL.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    /// Allow all origins (`*`)
    #[serde(deserialize_with = "parse_wildcard")]
    Wildcard,
    /// Specific origin URL (e.g., `https://beds.example.com`)
    Url(Url),
}

fn parse_wildcard<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s == "*" {
        Ok(())
    } else {
        Err(serde::de::Error::custom("Expected '*'"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            default_resource_type: "ICU_BED".to_string(),
            resources: vec![
                ResourceSeed {
                    resource_type: "ICU_BED".to_string(),
                    count: 3,
                },
                ResourceSeed {
                    resource_type: "VENTILATOR".to_string(),
                    count: 2,
                },
            ],
            scheduler: SchedulerConfig::default(),
            cors: CorsConfig::default(),
            enable_metrics: false,
            enable_otel_export: false,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(5),
            aging_interval: Some(Duration::from_secs(60)),
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![CorsOrigin::Wildcard],
            max_age: Some(3600),
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            .merge(Yaml::file(&args.config))
            // ALLOCTL_CONFIG names the file itself and is not a config key
            .merge(Env::prefixed("ALLOCTL_").ignore(&["CONFIG"]).split("__"))
    }

    /// Check the configuration for consistency.
    pub fn validate(&self) -> anyhow::Result<()> {
        for seed in &self.resources {
            if seed.resource_type.trim().is_empty() {
                anyhow::bail!("Config validation: resources entries need a non-empty resource_type");
            }
            if seed.count == 0 {
                anyhow::bail!(
                    "Config validation: resources entry for '{}' has count 0. Remove it or set a positive count.",
                    seed.resource_type
                );
            }
        }

        if !self.resources.iter().any(|seed| seed.resource_type == self.default_resource_type) {
            anyhow::bail!(
                "Config validation: default_resource_type '{}' is not one of the configured resource types",
                self.default_resource_type
            );
        }

        if self.scheduler.enabled && self.scheduler.interval.is_zero() {
            anyhow::bail!("Config validation: scheduler.interval must be greater than zero");
        }
        if self.scheduler.aging_interval.is_some_and(|d| d.is_zero()) {
            anyhow::bail!("Config validation: scheduler.aging_interval must be greater than zero, or null to disable aging");
        }

        if self.cors.allowed_origins.is_empty() {
            anyhow::bail!("Config validation: CORS allowed_origins cannot be empty. Add at least one allowed origin.");
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Settings handed to the allocation engine.
    pub fn engine_config(&self) -> anyhow::Result<EngineConfig> {
        let aging_interval = self.scheduler.aging_interval.map(chrono::Duration::from_std).transpose()?;
        Ok(EngineConfig {
            default_resource_type: ResourceType::from(self.default_resource_type.as_str()),
            aging_interval,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn args(path: &str) -> Args {
        Args {
            config: path.to_string(),
            validate: false,
        }
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        Jail::expect_with(|_jail| {
            let config = Config::load(&args("nope.yaml"))?;

            assert_eq!(config.bind_address(), "0.0.0.0:5000");
            assert_eq!(config.default_resource_type, "ICU_BED");
            assert_eq!(config.resources.len(), 2);
            assert_eq!(config.resources[0].count, 3);
            assert_eq!(config.resources[1].resource_type, "VENTILATOR");
            assert!(config.scheduler.enabled);
            assert_eq!(config.scheduler.interval, Duration::from_secs(5));
            assert_eq!(config.scheduler.aging_interval, Some(Duration::from_secs(60)));
            assert!(!config.enable_metrics);
            Ok(())
        });
    }

    #[test]
    fn test_yaml_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
port: 9000
default_resource_type: bed
resources:
  - resource_type: bed
    count: 4
  - resource_type: dialysis
    count: 1
scheduler:
  interval: 250ms
  aging_interval: 2m
cors:
  allowed_origins:
    - https://beds.example.com
enable_metrics: true
"#,
            )?;

            let config = Config::load(&args("test.yaml"))?;

            assert_eq!(config.port, 9000);
            assert_eq!(config.resources[0].count, 4);
            assert_eq!(config.scheduler.interval, Duration::from_millis(250));
            assert_eq!(config.scheduler.aging_interval, Some(Duration::from_secs(120)));
            assert!(matches!(&config.cors.allowed_origins[0], CorsOrigin::Url(url) if url.host_str() == Some("beds.example.com")));
            assert!(config.enable_metrics);

            let engine = config.engine_config().map_err(|e| e.to_string())?;
            assert_eq!(engine.default_resource_type.as_str(), "bed");
            assert_eq!(engine.aging_interval, Some(chrono::Duration::minutes(2)));
            Ok(())
        });
    }

    #[test]
    fn test_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "port: 9000\n")?;
            jail.set_env("ALLOCTL_PORT", "8080");
            jail.set_env("ALLOCTL_HOST", "127.0.0.1");
            jail.set_env("ALLOCTL_SCHEDULER__ENABLED", "false");

            let config = Config::load(&args("test.yaml"))?;

            assert_eq!(config.bind_address(), "127.0.0.1:8080");
            assert!(!config.scheduler.enabled);
            Ok(())
        });
    }

    #[test]
    fn test_config_path_variable_is_not_a_key() {
        Jail::expect_with(|jail| {
            jail.create_file("custom.yaml", "port: 7000\n")?;
            jail.set_env("ALLOCTL_CONFIG", "custom.yaml");

            let config = Config::load(&args("custom.yaml"))?;
            assert_eq!(config.port, 7000);
            Ok(())
        });
    }

    #[test]
    fn test_aging_can_be_disabled() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "scheduler:\n  aging_interval: null\n")?;

            let config = Config::load(&args("test.yaml"))?;
            assert_eq!(config.scheduler.aging_interval, None);
            assert_eq!(config.engine_config().map_err(|e| e.to_string())?.aging_interval, None);
            Ok(())
        });
    }

    #[test]
    fn test_unknown_default_type_is_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
default_resource_type: MRI
resources:
  - resource_type: ICU_BED
    count: 1
"#,
            )?;

            let err = Config::load(&args("test.yaml")).unwrap_err();
            assert!(err.to_string().contains("default_resource_type 'MRI'"));
            Ok(())
        });
    }

    #[test]
    fn test_zero_count_is_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
resources:
  - resource_type: ICU_BED
    count: 0
"#,
            )?;

            assert!(Config::load(&args("test.yaml")).is_err());
            Ok(())
        });
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "prot: 8080\n")?;
            assert!(Config::load(&args("test.yaml")).is_err());
            Ok(())
        });
    }
}
