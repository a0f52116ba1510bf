//! Daemon configuration.
//!
//! Loaded from an optional YAML file with CLI overrides on top. Validation
//! is strict where it matters for safety: `local` mode ships no
//! authentication and is therefore only legal on a loopback bind.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use serde::Deserialize;

use crate::origin::OriginPolicy;

/// Authentication mode selector.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    #[default]
    Local,
    SharedSecret,
    SignedToken,
    MutualCert,
}

impl AuthMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::SharedSecret => "shared-secret",
            Self::SignedToken => "signed-token",
            Self::MutualCert => "mutual-cert",
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    pub mode: AuthMode,
    /// Shared secret for `shared-secret` mode. Never serialized back out.
    pub shared_secret: Option<String>,
    /// Expected `iss` for `signed-token` mode.
    pub issuer: Option<String>,
    /// Expected `aud` for `signed-token` mode; unchecked when unset.
    pub audience: Option<String>,
    /// Remote endpoint serving the signing keys.
    pub keys_url: Option<String>,
    /// Key cache TTL in seconds.
    pub keys_ttl_secs: u64,
    /// Trust anchor for `mutual-cert` mode (PEM bundle).
    pub client_ca: Option<PathBuf>,
    /// Server certificate/key for TLS listeners.
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
}

impl AuthConfig {
    pub fn keys_ttl(&self) -> Duration {
        let secs = if self.keys_ttl_secs == 0 {
            300
        } else {
            self.keys_ttl_secs
        };
        Duration::from_secs(secs)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Listen address.
    pub bind: SocketAddr,
    /// Directory holding per-project state; runtime mutable.
    pub project_dir: PathBuf,
    /// Origin allowlist; empty means the loopback defaults.
    pub allowed_origins: Vec<String>,
    pub auth: AuthConfig,
    /// Replay cache TTL in seconds.
    pub idempotency_ttl_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7700".parse().expect("static addr"),
            project_dir: PathBuf::from("."),
            allowed_origins: Vec::new(),
            auth: AuthConfig::default(),
            idempotency_ttl_secs: 24 * 60 * 60,
        }
    }
}

impl Config {
    pub fn load(path: Option<&std::path::Path>) -> anyhow::Result<Self> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
                serde_yaml::from_str(&raw)
                    .map_err(|e| anyhow::anyhow!("parsing {}: {e}", path.display()))?
            }
            None => Self::default(),
        };
        Ok(config)
    }

    /// Fatal misconfigurations are caught here, before any socket binds.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.auth.mode == AuthMode::Local && !self.bind.ip().is_loopback() {
            anyhow::bail!(
                "auth mode `local` must not bind non-loopback address {}; configure \
                 shared-secret, signed-token or mutual-cert",
                self.bind
            );
        }
        if self.auth.mode == AuthMode::SharedSecret
            && self.auth.shared_secret.as_deref().unwrap_or("").is_empty()
        {
            anyhow::bail!("shared-secret mode requires a non-empty auth.shared_secret");
        }
        Ok(())
    }

    pub fn origin_policy(&self) -> OriginPolicy {
        if self.allowed_origins.is_empty() {
            OriginPolicy::default_loopback()
        } else {
            OriginPolicy::new(&self.allowed_origins)
        }
    }

    pub fn idempotency_ttl(&self) -> Duration {
        Duration::from_secs(self.idempotency_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_local_loopback() {
        let config = Config::default();
        assert_eq!(config.auth.mode, AuthMode::Local);
        assert!(config.bind.ip().is_loopback());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn local_mode_on_public_bind_is_fatal() {
        let mut config = Config::default();
        config.bind = "0.0.0.0:7700".parse().unwrap();
        assert!(config.validate().is_err());

        config.auth.mode = AuthMode::SharedSecret;
        config.auth.shared_secret = Some("s3cret".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn shared_secret_mode_requires_a_secret() {
        let mut config = Config::default();
        config.auth.mode = AuthMode::SharedSecret;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_yaml_with_kebab_case_modes() {
        let raw = r#"
bind: "127.0.0.1:9000"
allowed_origins: ["http://localhost:3000"]
auth:
  mode: signed-token
  issuer: "https://sso.example"
  keys_url: "https://sso.example/keys"
"#;
        let config: Config = serde_yaml::from_str(raw).unwrap();
        assert_eq!(config.auth.mode, AuthMode::SignedToken);
        assert_eq!(config.bind.port(), 9000);
        assert_eq!(config.allowed_origins.len(), 1);
        assert_eq!(config.auth.keys_ttl(), Duration::from_secs(300));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let raw = "bind: \"127.0.0.1:9000\"\nsurprise: true\n";
        assert!(serde_yaml::from_str::<Config>(raw).is_err());
    }
}
