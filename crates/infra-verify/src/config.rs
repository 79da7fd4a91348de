//! Harness configuration
//!
//! Values come from `INFRA_VERIFY_*` environment variables with defaults for
//! the shared forge test account.

use crate::error::{HarnessError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_SSM_PARAMETER: &str = "/forge/terratest/gitlab-runner-token";

/// Process-wide settings shared by every scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// AWS region for SSM, Auto Scaling and EKS calls
    pub region: String,
    /// SSM parameter holding the runner registration token
    pub ssm_parameter: String,
    /// Terraform binary
    pub terraform_bin: PathBuf,
    /// Directory containing the `ec2/` and `eks/` Terraform roots
    pub deploy_root: PathBuf,
    /// Extra `Owner` tag value
    pub owner: Option<String>,
    /// Fixed seed for name generation
    pub name_seed: Option<u64>,
    /// Per-command Terraform timeout
    pub timeout_secs: Option<u64>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        HarnessConfig {
            region: DEFAULT_REGION.to_string(),
            ssm_parameter: DEFAULT_SSM_PARAMETER.to_string(),
            terraform_bin: PathBuf::from("terraform"),
            deploy_root: PathBuf::from("deploy"),
            owner: None,
            name_seed: None,
            timeout_secs: None,
        }
    }
}

impl HarnessConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(HarnessConfig {
            region: get("INFRA_VERIFY_REGION").unwrap_or(defaults.region),
            ssm_parameter: get("INFRA_VERIFY_SSM_PARAMETER").unwrap_or(defaults.ssm_parameter),
            terraform_bin: get("INFRA_VERIFY_TERRAFORM_BIN")
                .map(PathBuf::from)
                .unwrap_or(defaults.terraform_bin),
            deploy_root: get("INFRA_VERIFY_DEPLOY_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.deploy_root),
            owner: get("INFRA_VERIFY_OWNER"),
            name_seed: parse_u64("INFRA_VERIFY_NAME_SEED", get("INFRA_VERIFY_NAME_SEED"))?,
            timeout_secs: parse_u64("INFRA_VERIFY_TIMEOUT_SECS", get("INFRA_VERIFY_TIMEOUT_SECS"))?,
        })
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Tags applied to every provisioned resource.
    pub fn tags(&self) -> BTreeMap<String, String> {
        let mut tags = BTreeMap::new();
        tags.insert("t_AppID".to_string(), "SVC03377".to_string());
        tags.insert("t_dcl".to_string(), "3".to_string());
        if let Some(owner) = &self.owner {
            tags.insert("Owner".to_string(), owner.clone());
        }
        tags
    }
}

fn parse_u64(key: &str, raw: Option<String>) -> Result<Option<u64>> {
    raw.map(|v| {
        v.trim()
            .parse::<u64>()
            .map_err(|e| HarnessError::Config(format!("{key}={v:?}: {e}")))
    })
    .transpose()
}
