//! Client Policy Module
//!
//! Provides policy loading for the cluster tending layer.
//! Supports loading from TOML files with environment-specific overrides.

use crate::defaults;
use anyhow::{bail, Context, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Settings that govern how the client discovers and tends a cluster
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ClientPolicy {
    /// Connect timeout; also bounds startup stabilization
    pub timeout_ms: u64,

    /// Maximum idle connections cached per node
    pub connection_queue_size: usize,

    /// Delay between tend cycles
    pub tend_interval_ms: u64,

    /// Expected cluster name; nodes reporting another name are rejected
    pub cluster_name: Option<String>,

    /// Fail `connect` when no node could be reached
    pub fail_if_not_connected: bool,

    // Credentials
    pub user: Option<String>,
    pub password: Option<String>,

    pub tls: Option<TlsOptions>,
}

/// TLS settings
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct TlsOptions {
    pub enable: bool,
    /// PEM bundle with additional trusted roots
    pub ca_file: Option<PathBuf>,
    pub accept_invalid_certs: bool,
    pub accept_invalid_hostnames: bool,
}

impl Default for ClientPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: defaults::CONNECT_TIMEOUT_MS,
            connection_queue_size: defaults::CONNECTION_QUEUE_SIZE,
            tend_interval_ms: defaults::TEND_INTERVAL_MS,
            cluster_name: None,
            fail_if_not_connected: true,
            user: None,
            password: None,
            tls: None,
        }
    }
}

impl ClientPolicy {
    /// Load policy from files with environment overrides
    pub fn load(base_path: Option<&Path>, environment: Option<&str>) -> Result<Self> {
        let base = base_path.unwrap_or(Path::new("config/client.toml"));

        let mut builder = Config::builder().add_source(File::from(base).required(true));

        // Add environment-specific overrides if specified
        if let Some(env) = environment {
            let env_file = PathBuf::from("config/environments").join(format!("{}.toml", env));

            if env_file.exists() {
                info!("Loading environment config: {:?}", env_file);
                builder = builder.add_source(File::from(env_file));
            } else {
                warn!("Environment config not found: {:?}", env_file);
            }
        }

        // Override with environment variables (KVCLIENT_ prefix)
        builder = builder.add_source(
            Environment::with_prefix(defaults::ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build client policy")?;

        let mut policy: ClientPolicy = config
            .try_deserialize()
            .context("Failed to deserialize client policy")?;

        policy.expand_env_vars()?;
        policy.validate()?;

        debug!(?policy, "Loaded client policy");
        Ok(policy)
    }

    /// Parse a policy from a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut policy: ClientPolicy =
            toml::from_str(content).context("Failed to parse client policy")?;
        policy.expand_env_vars()?;
        policy.validate()?;
        Ok(policy)
    }

    /// Reject settings the tend loop cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.connection_queue_size == 0 {
            bail!("connection_queue_size must be greater than zero");
        }
        if self.timeout_ms == 0 {
            bail!("timeout_ms must be greater than zero");
        }
        if self.tend_interval_ms == 0 {
            bail!("tend_interval_ms must be greater than zero");
        }
        if self.password.is_some() && self.user.as_deref().unwrap_or("").is_empty() {
            bail!("password configured without a user");
        }
        Ok(())
    }

    /// Expand environment variables in path values
    pub fn expand_env_vars(&mut self) -> Result<()> {
        if let Some(ca_file) = self.tls.as_mut().and_then(|tls| tls.ca_file.as_mut()) {
            let raw = ca_file.to_string_lossy().into_owned();
            let expanded = shellexpand::env(&raw).context("Failed to expand ca_file path")?;
            *ca_file = PathBuf::from(expanded.as_ref());
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn tend_interval(&self) -> Duration {
        Duration::from_millis(self.tend_interval_ms)
    }

    /// Whether connections must be authenticated
    pub fn requires_authentication(&self) -> bool {
        self.user.as_deref().map_or(false, |u| !u.is_empty())
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls.as_ref().map_or(false, |tls| tls.enable)
    }
}

/// Convenience function to load the policy with defaults
pub fn load_policy(path: Option<&Path>, environment: Option<&str>) -> Result<ClientPolicy> {
    ClientPolicy::load(path, environment)
}
