//! Infra-Verify: provision, verify and destroy the GitLab runner infrastructure
//!
//! Each scenario applies a Terraform root with generated names and the runner
//! registration token from SSM, checks that the resulting AWS resources reach
//! their steady state, and always destroys what it created.
//!
//! - [`naming`]: collision-free name pairs from an explicit RNG
//! - [`secrets`] and [`aws`]: decrypted SSM parameters
//! - [`provision`] and [`terraform`]: apply/destroy with a release-once lease
//! - [`verify`]: Auto Scaling and EKS health checks
//! - [`scenario`]: the end-to-end orchestrator

pub mod aws;
pub mod config;
pub mod error;
pub mod fakes;
pub mod naming;
pub mod obs;
pub mod provision;
pub mod scenario;
pub mod secrets;
pub mod telemetry;
pub mod terraform;
pub mod verify;

pub use aws::AwsControlPlane;
pub use config::HarnessConfig;
pub use error::{HarnessError, Result};
pub use naming::{NameGenerator, RunIdentity};
pub use provision::{
    ProvisionLease, Provisioner, ProvisioningOutputs, ProvisioningRequest, VarValue,
};
pub use scenario::{Harness, Phase, ScenarioConfig, ScenarioKind, ScenarioReport};
pub use secrets::{SecretStore, SecretValue};
pub use telemetry::init_tracing;
pub use terraform::TerraformCli;
pub use verify::{
    verify_cluster_active, verify_group_healthy, verify_node_groups_active, ClusterDescriber,
    HealthReport, ResourceHealth, ResourceKind, ScalingGroup, ScalingGroupDescriber,
    StatusMismatch,
};
