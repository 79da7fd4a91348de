//! Auto Scaling Group health.

use super::{HealthReport, ResourceKind, StatusMatch};
use crate::error::{HarnessError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Lifecycle state every instance must reach.
pub const IN_SERVICE: &str = "InService";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInstance {
    pub instance_id: String,
    pub lifecycle_state: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingGroup {
    pub name: String,
    pub instances: Vec<GroupInstance>,
}

/// Describe access to scaling groups.
#[async_trait]
pub trait ScalingGroupDescriber: Send + Sync {
    /// `Ok(None)` when no group with that name exists.
    async fn describe_scaling_group(&self, name: &str, region: &str)
        -> Result<Option<ScalingGroup>>;
}

/// Assert every instance in `group` is `InService`.
///
/// All instances are checked before reporting; a missing or empty group is
/// [`HarnessError::NotFound`].
pub async fn verify_group_healthy(
    api: &dyn ScalingGroupDescriber,
    group: &str,
    region: &str,
) -> Result<HealthReport> {
    let described = api.describe_scaling_group(group, region).await?;

    let instances = match described {
        Some(g) if !g.instances.is_empty() => g.instances,
        _ => {
            return Err(HarnessError::NotFound(format!(
                "no instances found in auto scaling group {group} ({region})"
            )))
        }
    };

    let mut report = HealthReport::new();
    for instance in &instances {
        report.check(
            ResourceKind::ScalingGroupInstance,
            &instance.instance_id,
            &instance.lifecycle_state,
            IN_SERVICE,
            StatusMatch::IgnoreAsciiCase,
        );
    }

    if report.is_healthy() {
        info!(group = %group, instances = instances.len(), "All instances in service");
    } else {
        warn!(
            group = %group,
            unhealthy = report.mismatches.len(),
            instances = instances.len(),
            "Instances not in service"
        );
    }
    report.into_result()
}
