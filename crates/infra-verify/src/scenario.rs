//! Scenario orchestration.
//!
//! A scenario generates names, resolves the runner token, applies the
//! Terraform root, verifies the provisioned resources and destroys them again:
//!
//! ```text
//! Init -> NamesGenerated -> SecretResolved -> Applied -> Verified -> Destroyed
//! ```
//!
//! The first failure ends the run. Once apply has been attempted, destroy runs
//! exactly once on every exit path, panics included.

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use crate::aws::AwsControlPlane;
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::naming::{NameGenerator, RunIdentity};
use crate::obs;
use crate::provision::{ProvisionLease, Provisioner, ProvisioningRequest};
use crate::secrets::{SecretStore, SecretValue};
use crate::terraform::TerraformCli;
use crate::verify::{
    verify_cluster_active, verify_group_healthy, verify_node_groups_active, ClusterDescriber,
    HealthReport, ScalingGroupDescriber,
};

/// Which Terraform root a scenario exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioKind {
    /// GitLab runners on an EC2 Auto Scaling Group
    Ec2,
    /// GitLab runners on EKS self-managed node groups
    Eks,
}

impl ScenarioKind {
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioKind::Ec2 => "ec2",
            ScenarioKind::Eks => "eks",
        }
    }

    pub fn name_prefix(&self) -> &'static str {
        match self {
            ScenarioKind::Ec2 => "ec2-runner-go-",
            ScenarioKind::Eks => "eks-runner-go-",
        }
    }

    pub fn vpc_cidr_block(&self) -> &'static str {
        match self {
            ScenarioKind::Ec2 => "114.0.0.0/24",
            ScenarioKind::Eks => "119.0.0.0/24",
        }
    }
}

impl std::fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Lifecycle phase of a scenario run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    NamesGenerated,
    SecretResolved,
    Applied,
    Verified,
    Destroyed,
    Failed,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Init => "init",
            Phase::NamesGenerated => "names_generated",
            Phase::SecretResolved => "secret_resolved",
            Phase::Applied => "applied",
            Phase::Verified => "verified",
            Phase::Destroyed => "destroyed",
            Phase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Ordered record of the phases a run passed through.
#[derive(Debug)]
struct PhaseTrail {
    phases: Vec<Phase>,
}

impl PhaseTrail {
    fn start() -> Self {
        obs::emit_phase(Phase::Init);
        Self {
            phases: vec![Phase::Init],
        }
    }

    fn advance(&mut self, phase: Phase) {
        obs::emit_phase(phase);
        self.phases.push(phase);
    }

    fn has_failed(&self) -> bool {
        self.phases.contains(&Phase::Failed)
    }
}

/// Inputs for one scenario run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioConfig {
    pub kind: ScenarioKind,
    pub name_prefix: String,
    pub region: String,
    pub ssm_parameter: String,
    pub working_dir: PathBuf,
    pub vpc_cidr_block: String,
    pub tags: std::collections::BTreeMap<String, String>,
}

impl ScenarioConfig {
    /// Scenario defaults for `kind`, rooted at `config.deploy_root/<kind>`.
    pub fn for_kind(kind: ScenarioKind, config: &HarnessConfig) -> Self {
        Self {
            kind,
            name_prefix: kind.name_prefix().to_string(),
            region: config.region.clone(),
            ssm_parameter: config.ssm_parameter.clone(),
            working_dir: config.deploy_root.join(kind.name()),
            vpc_cidr_block: kind.vpc_cidr_block().to_string(),
            tags: config.tags(),
        }
    }

    pub fn ec2(config: &HarnessConfig) -> Self {
        Self::for_kind(ScenarioKind::Ec2, config)
    }

    pub fn eks(config: &HarnessConfig) -> Self {
        Self::for_kind(ScenarioKind::Eks, config)
    }

    /// Terraform variables for this run.
    pub fn request(&self, identity: &RunIdentity, token: &SecretValue) -> ProvisioningRequest {
        ProvisioningRequest::new(self.working_dir.clone())
            .var("project_name", identity.primary.clone())
            .var("project_name_2", identity.secondary.clone())
            .var("vpc_cidr_block", self.vpc_cidr_block.clone())
            .sensitive_var("gitlab_runner_token", token.expose())
            .map_var("tags", self.tags.clone())
    }
}

/// Outcome of one scenario run.
#[derive(Debug)]
pub struct ScenarioReport {
    pub run_id: Uuid,
    pub kind: ScenarioKind,
    pub identity: RunIdentity,
    pub phases: Vec<Phase>,
    pub health: Option<HealthReport>,
    /// First failure of the run.
    pub error: Option<HarnessError>,
    /// Failure of the final destroy.
    pub cleanup_error: Option<HarnessError>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ScenarioReport {
    pub fn final_phase(&self) -> Phase {
        self.phases.last().copied().unwrap_or(Phase::Init)
    }

    pub fn destroyed(&self) -> bool {
        self.phases.contains(&Phase::Destroyed)
    }

    pub fn passed(&self) -> bool {
        self.error.is_none()
            && self.cleanup_error.is_none()
            && self.phases.contains(&Phase::Verified)
            && self.final_phase() == Phase::Destroyed
    }

    /// The first error of the run, then any destroy error, else the health report.
    pub fn into_result(self) -> Result<HealthReport> {
        if let Some(err) = self.error {
            return Err(err);
        }
        if let Some(err) = self.cleanup_error {
            return Err(err);
        }
        Ok(self.health.unwrap_or_default())
    }

    fn finish(mut self, trail: PhaseTrail, start: Instant) -> Self {
        self.phases = trail.phases;
        self.duration_ms = start.elapsed().as_millis() as u64;
        obs::emit_scenario_finished(self.final_phase(), self.duration_ms, self.passed());
        self
    }
}

/// Composes the secret store, provisioner and describers into scenario runs.
#[derive(Clone)]
pub struct Harness {
    secrets: Arc<dyn SecretStore>,
    provisioner: Arc<dyn Provisioner>,
    scaling_groups: Arc<dyn ScalingGroupDescriber>,
    clusters: Arc<dyn ClusterDescriber>,
}

impl Harness {
    pub fn new(
        secrets: Arc<dyn SecretStore>,
        provisioner: Arc<dyn Provisioner>,
        scaling_groups: Arc<dyn ScalingGroupDescriber>,
        clusters: Arc<dyn ClusterDescriber>,
    ) -> Self {
        Self {
            secrets,
            provisioner,
            scaling_groups,
            clusters,
        }
    }

    /// Real AWS control plane with the given Terraform driver.
    pub fn aws(terraform: TerraformCli) -> Self {
        let aws = Arc::new(AwsControlPlane::new());
        Self::new(aws.clone(), Arc::new(terraform), aws.clone(), aws)
    }

    /// Real AWS control plane with Terraform configured from `config`.
    pub fn from_config(config: &HarnessConfig) -> Self {
        let mut terraform = TerraformCli::new(config.terraform_bin.clone());
        if let Some(timeout) = config.timeout() {
            terraform = terraform.with_timeout(timeout);
        }
        Self::aws(terraform)
    }

    /// Run one scenario end to end.
    ///
    /// A panic during apply or verification is resumed after destroy has run.
    pub async fn run<R: Rng>(
        &self,
        scenario: &ScenarioConfig,
        names: &mut NameGenerator<R>,
    ) -> ScenarioReport {
        let run_id = Uuid::new_v4();
        let span = obs::scenario_span(&run_id, scenario.kind);
        self.run_in_span(run_id, scenario, names)
            .instrument(span)
            .await
    }

    async fn run_in_span<R: Rng>(
        &self,
        run_id: Uuid,
        scenario: &ScenarioConfig,
        names: &mut NameGenerator<R>,
    ) -> ScenarioReport {
        let start = Instant::now();
        let mut trail = PhaseTrail::start();

        let identity = names.generate(&scenario.name_prefix);
        trail.advance(Phase::NamesGenerated);
        info!(
            project_name = %identity.primary,
            project_name_2 = %identity.secondary,
            dir = %scenario.working_dir.display(),
            "Starting scenario"
        );

        let mut report = ScenarioReport {
            run_id,
            kind: scenario.kind,
            identity: identity.clone(),
            phases: Vec::new(),
            health: None,
            error: None,
            cleanup_error: None,
            started_at: Utc::now(),
            duration_ms: 0,
        };

        let token = match self
            .secrets
            .resolve(&scenario.ssm_parameter, &scenario.region)
            .await
        {
            Ok(token) => token,
            Err(e) => {
                error!(error = %e, "Could not resolve runner token");
                trail.advance(Phase::Failed);
                report.error = Some(e);
                return report.finish(trail, start);
            }
        };
        trail.advance(Phase::SecretResolved);

        let lease = ProvisionLease::new(
            self.provisioner.clone(),
            scenario.request(&identity, &token),
        );

        let outcome = AssertUnwindSafe(self.apply_and_verify(&lease, scenario, &mut trail))
            .catch_unwind()
            .await;

        let panic = match outcome {
            Ok(Ok(health)) => {
                report.health = Some(health);
                None
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Scenario failed, destroying");
                trail.advance(Phase::Failed);
                report.error = Some(e);
                None
            }
            Err(payload) => {
                error!(panic = %panic_message(payload.as_ref()), "Scenario panicked, destroying");
                trail.advance(Phase::Failed);
                Some(payload)
            }
        };

        match lease.release().await {
            Ok(()) => trail.advance(Phase::Destroyed),
            Err(e) => {
                error!(error = %e, "Destroy failed, resources may be left behind");
                if !trail.has_failed() {
                    trail.advance(Phase::Failed);
                }
                report.cleanup_error = Some(e);
            }
        }

        let report = report.finish(trail, start);
        if let Some(payload) = panic {
            std::panic::resume_unwind(payload);
        }
        report
    }

    async fn apply_and_verify(
        &self,
        lease: &ProvisionLease,
        scenario: &ScenarioConfig,
        trail: &mut PhaseTrail,
    ) -> Result<HealthReport> {
        let outputs = lease.apply().await?;
        trail.advance(Phase::Applied);

        let region = scenario.region.as_str();
        let health = match scenario.kind {
            ScenarioKind::Ec2 => {
                let asg_name = outputs.require("asg_name")?;
                verify_group_healthy(self.scaling_groups.as_ref(), &asg_name, region).await?
            }
            ScenarioKind::Eks => {
                let cluster = outputs.require("cluster_name")?;
                let node_groups = outputs.require("self_managed_node_groups")?;
                let mut health =
                    verify_cluster_active(self.clusters.as_ref(), &cluster, region).await?;
                health.merge(
                    verify_node_groups_active(self.clusters.as_ref(), &cluster, &node_groups, region)
                        .await?,
                );
                health
            }
        };

        trail.advance(Phase::Verified);
        Ok(health)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
