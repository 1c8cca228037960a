//! Server configuration: defaults, then `config.toml`, then `DEALMATCH_*`
//! environment variables (`__` separates nested keys, e.g.
//! `DEALMATCH_BILLING__WEBHOOK_SECRET`).

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use anyhow::Context as _;
use axum::http::HeaderName;
use config::{builder::DefaultState, ConfigBuilder, ConfigError, Environment, File};
use dealmatch_api::{ApiConfig, MatchConfig};
use dealmatch_augment::{AugmentConfig, HttpCompleterConfig};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  pub host:                String,
  pub port:                u16,
  pub store_path:          PathBuf,
  pub identity_header:     String,
  pub require_entitlement: bool,
  pub billing:             BillingConfig,
  pub completion:          CompletionConfig,
  pub matching:            MatchingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
  pub webhook_secret: String,
  pub tolerance_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionConfig {
  pub api_url:      String,
  /// Without a key every AI path takes its deterministic fallback.
  pub api_key:      Option<String>,
  pub model:        String,
  pub timeout_secs: u64,
  pub max_tokens:   u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatchingConfig {
  pub lease_ttl_secs:   u64,
  pub poll_interval_ms: u64,
}

/// Slack between the slowest augmentation and the pair lease expiring.
const LEASE_MARGIN: Duration = Duration::from_secs(5);

fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
  config::Config::builder()
    .set_default("host", "127.0.0.1")?
    .set_default("port", 8080_i64)?
    .set_default("store_path", "~/.local/share/dealmatch/dealmatch.db")?
    .set_default("identity_header", "x-user-id")?
    .set_default("require_entitlement", true)?
    .set_default("billing.tolerance_secs", 300_i64)?
    .set_default("completion.api_url", "https://api.openai.com")?
    .set_default("completion.model", "gpt-4o-mini")?
    .set_default("completion.timeout_secs", 20_i64)?
    .set_default("completion.max_tokens", 800_i64)?
    .set_default("matching.lease_ttl_secs", 60_i64)?
    .set_default("matching.poll_interval_ms", 100_i64)
}

impl ServerConfig {
  /// Layer the file at `path` (optional) and the environment over the
  /// defaults.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    defaults()?
      .add_source(File::from(path).required(false))
      .add_source(
        Environment::with_prefix("DEALMATCH")
          .prefix_separator("_")
          .separator("__"),
      )
      .build()?
      .try_deserialize()
  }

  pub fn api_config(&self) -> anyhow::Result<ApiConfig> {
    anyhow::ensure!(
      !self.billing.webhook_secret.trim().is_empty(),
      "billing.webhook_secret must be set"
    );
    let identity_header = HeaderName::try_from(self.identity_header.as_str())
      .with_context(|| format!("invalid identity_header {:?}", self.identity_header))?;

    let augment = AugmentConfig {
      timeout:    Duration::from_secs(self.completion.timeout_secs),
      max_tokens: self.completion.max_tokens,
    };
    let lease_ttl = Duration::from_secs(self.matching.lease_ttl_secs);
    anyhow::ensure!(
      lease_ttl >= augment.worst_case() + LEASE_MARGIN,
      "matching.lease_ttl_secs ({}) must be at least twice completion.timeout_secs ({}) plus {}",
      self.matching.lease_ttl_secs,
      self.completion.timeout_secs,
      LEASE_MARGIN.as_secs()
    );

    Ok(ApiConfig {
      identity_header,
      require_entitlement: self.require_entitlement,
      augment,
      matching: MatchConfig {
        lease_ttl,
        poll_interval: Duration::from_millis(self.matching.poll_interval_ms),
        wait_timeout: lease_ttl,
      },
      webhook_secret: self.billing.webhook_secret.clone(),
      webhook_tolerance: Duration::from_secs(self.billing.tolerance_secs),
    })
  }

  /// Settings for the HTTP completer, if a key is configured.
  pub fn completer_config(&self) -> Option<HttpCompleterConfig> {
    let api_key = self.completion.api_key.as_ref().filter(|k| !k.trim().is_empty())?;
    Some(HttpCompleterConfig {
      api_url: self.completion.api_url.clone(),
      api_key: api_key.clone(),
      model:   self.completion.model.clone(),
      timeout: Duration::from_secs(self.completion.timeout_secs),
    })
  }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use config::FileFormat;

  use super::*;

  fn parse(toml: &str) -> Result<ServerConfig, ConfigError> {
    defaults()?
      .add_source(File::from_str(toml, FileFormat::Toml))
      .build()?
      .try_deserialize()
  }

  #[test]
  fn defaults_fill_everything_but_the_secret() {
    let cfg = parse("[billing]\nwebhook_secret = \"whsec_1\"").unwrap();
    assert_eq!(cfg.port, 8080);
    assert_eq!(cfg.identity_header, "x-user-id");
    assert!(cfg.require_entitlement);
    assert!(cfg.completer_config().is_none());

    let api = cfg.api_config().unwrap();
    assert_eq!(api.webhook_tolerance, Duration::from_secs(300));
    assert_eq!(api.augment.max_tokens, 800);
    assert_eq!(api.matching.lease_ttl, Duration::from_secs(60));
  }

  #[test]
  fn missing_or_blank_secret_is_rejected() {
    assert!(parse("port = 9000").is_err());
    let blank = parse("[billing]\nwebhook_secret = \"  \"").unwrap();
    assert!(blank.api_config().is_err());
  }

  #[test]
  fn lease_must_outlast_a_retried_completion() {
    let slow = parse("[billing]\nwebhook_secret = \"s\"\n[completion]\ntimeout_secs = 40").unwrap();
    let err = slow.api_config().unwrap_err();
    assert!(err.to_string().contains("lease_ttl_secs"), "{err}");

    let longer = parse(
      "[billing]\nwebhook_secret = \"s\"\n[completion]\ntimeout_secs = 40\n\
       [matching]\nlease_ttl_secs = 85",
    )
    .unwrap();
    let api = longer.api_config().unwrap();
    assert_eq!(api.matching.lease_ttl, Duration::from_secs(85));
    assert_eq!(api.matching.wait_timeout, Duration::from_secs(85));
  }

  #[test]
  fn completion_key_enables_http_completer() {
    let cfg = parse(
      "[billing]\nwebhook_secret = \"s\"\n[completion]\napi_key = \"sk-1\"\nmodel = \"m\"",
    )
    .unwrap();
    let http = cfg.completer_config().unwrap();
    assert_eq!(http.model, "m");
    assert_eq!(http.api_url, "https://api.openai.com");
  }

  #[test]
  fn tilde_expands_to_home() {
    let expanded = expand_tilde(Path::new("~/x.db"));
    if let Ok(home) = std::env::var("HOME") {
      assert_eq!(expanded, PathBuf::from(home).join("x.db"));
    }
    assert_eq!(expand_tilde(Path::new("/tmp/x.db")), PathBuf::from("/tmp/x.db"));
  }
}
