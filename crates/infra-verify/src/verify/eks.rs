//! EKS cluster and node group health.

use super::{HealthReport, ResourceKind, StatusMatch};
use crate::error::{HarnessError, Result};
use async_trait::async_trait;
use tracing::info;

/// Status both clusters and node groups must report.
pub const ACTIVE: &str = "ACTIVE";

/// Describe access to EKS.
#[async_trait]
pub trait ClusterDescriber: Send + Sync {
    /// Cluster status string, e.g. `ACTIVE` or `CREATING`.
    async fn describe_cluster(&self, name: &str, region: &str) -> Result<String>;

    /// Node group status string.
    async fn describe_node_group(&self, cluster: &str, name: &str, region: &str)
        -> Result<String>;
}

/// Assert the cluster reports exactly `ACTIVE`.
pub async fn verify_cluster_active(
    api: &dyn ClusterDescriber,
    cluster: &str,
    region: &str,
) -> Result<HealthReport> {
    let status = api.describe_cluster(cluster, region).await?;

    let mut report = HealthReport::new();
    report.check(ResourceKind::Cluster, cluster, &status, ACTIVE, StatusMatch::Exact);
    info!(cluster = %cluster, status = %status, "Described cluster");
    report.into_result()
}

/// Decode a serialized JSON list of node group names.
pub fn decode_node_group_names(serialized: &str) -> Result<Vec<String>> {
    serde_json::from_str(serialized).map_err(|source| HarnessError::Decode {
        what: "node group list".to_string(),
        source,
    })
}

/// Assert every node group in `serialized` reports exactly `ACTIVE`.
///
/// A failed describe stops the check; status mismatches are collected across
/// all node groups.
pub async fn verify_node_groups_active(
    api: &dyn ClusterDescriber,
    cluster: &str,
    serialized: &str,
    region: &str,
) -> Result<HealthReport> {
    let names = decode_node_group_names(serialized)?;
    if names.is_empty() {
        return Err(HarnessError::EmptyResult(format!(
            "no node groups listed for cluster {cluster}"
        )));
    }

    let mut report = HealthReport::new();
    for name in &names {
        let status = api.describe_node_group(cluster, name, region).await?;
        report.check(ResourceKind::NodeGroup, name, &status, ACTIVE, StatusMatch::Exact);
    }

    info!(
        cluster = %cluster,
        node_groups = names.len(),
        inactive = report.mismatches.len(),
        "Described node groups"
    );
    report.into_result()
}
