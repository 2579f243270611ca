use clap::Args;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::auth::{AuthError, Secret};
use crate::store::RetainPolicy;

/// Options for the `serve` subcommand.
#[derive(Args, Serialize, Deserialize, Clone, Debug)]
pub struct ServeConfig {
    /// Listen address
    #[arg(short = 'l', long, env = "ARTISTORE_LISTEN", default_value = "0.0.0.0:3000")]
    pub listen: String,

    /// Path to the data directory
    #[arg(long, env = "ARTISTORE_STORE", default_value = "/var/lib/artistore")]
    pub store: String,

    /// Server secret. See also 'artistore secret'
    #[arg(long, env = "ARTISTORE_SECRET")]
    pub secret: Option<String>,

    /// Number of old revisions to retain per key (0 = retain all)
    #[arg(long, env = "ARTISTORE_RETAIN_NUM", default_value_t = 0)]
    pub retain_num: u64,

    /// How long to retain old revisions, e.g. "12h" or "30d" (unset = forever)
    #[arg(long, env = "ARTISTORE_RETAIN_PERIOD")]
    pub retain_period: Option<String>,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "ARTISTORE_JSON_LOGS")]
    pub json_logs: bool,

    /// Path to TOML config file
    #[arg(long, default_value = "./artistore.toml")]
    pub config: String,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:3000".to_string(),
            store: "/var/lib/artistore".to_string(),
            secret: None,
            retain_num: 0,
            retain_period: None,
            json_logs: false,
            config: "./artistore.toml".to_string(),
            generate_config: false,
        }
    }
}

impl ServeConfig {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (ARTISTORE_*) < CLI args
    pub fn load(cli: ServeConfig) -> Result<ServeConfig, figment::Error> {
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(ServeConfig::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("ARTISTORE_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }

    /// The configured secret, parsed.
    pub fn parsed_secret(&self) -> Result<Secret, AuthError> {
        match self.secret.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => Secret::parse(raw),
            _ => Err(AuthError::SecretNotSet),
        }
    }

    /// The configured retention policy, with `retain-period` parsed as a
    /// humantime duration.
    pub fn retain_policy(&self) -> Result<RetainPolicy, String> {
        let period = match self.retain_period.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => Some(
                humantime::parse_duration(raw)
                    .map_err(|e| format!("Invalid retain-period: {e}"))?,
            ),
            _ => None,
        };

        Ok(RetainPolicy {
            num: self.retain_num,
            period,
        })
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Artistore server configuration
# Place this file at ./artistore.toml or specify with --config <path>
# All settings can be overridden via environment variables (ARTISTORE_LISTEN, etc.)
# or CLI flags (--listen, etc.)

# Listen address (default: 0.0.0.0:3000)
# listen = "0.0.0.0:3000"

# Path to the data directory
# store = "/var/lib/artistore"

# Server secret; generate one with 'artistore secret'
# secret = "s1:..."

# Number of old revisions to retain per key (0 = retain all)
# retain_num = 0

# How long to retain old revisions, e.g. "12h" or "30d" (unset = forever)
# retain_period = ""

# Enable structured JSON logging for Docker/production
# json_logs = false
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retain_policy_parsing() {
        let mut config = ServeConfig::default();
        assert_eq!(config.retain_policy().unwrap().num, 0);
        assert!(config.retain_policy().unwrap().period.is_none());

        config.retain_num = 3;
        config.retain_period = Some("12h".to_string());
        let policy = config.retain_policy().unwrap();
        assert_eq!(policy.num, 3);
        assert_eq!(policy.period, Some(std::time::Duration::from_secs(12 * 3600)));

        config.retain_period = Some("soon".to_string());
        assert!(config.retain_policy().is_err());
    }

    #[test]
    fn test_secret_required() {
        let mut config = ServeConfig::default();
        assert!(matches!(config.parsed_secret(), Err(AuthError::SecretNotSet)));

        let secret = Secret::generate();
        config.secret = Some(secret.to_string());
        assert_eq!(config.parsed_secret().unwrap().to_string(), secret.to_string());
    }
}
