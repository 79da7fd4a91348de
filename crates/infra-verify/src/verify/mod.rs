//! Health verification against the cloud control plane.
//!
//! Verifiers describe resources, record what they observed and compare it to
//! the expected steady-state status. Describe failures abort immediately;
//! status mismatches are collected across every resource of one check and
//! reported together.

pub mod asg;
pub mod eks;

pub use asg::{
    verify_group_healthy, GroupInstance, ScalingGroup, ScalingGroupDescriber, IN_SERVICE,
};
pub use eks::{
    decode_node_group_names, verify_cluster_active, verify_node_groups_active, ClusterDescriber,
    ACTIVE,
};

use crate::error::{HarnessError, Result};
use serde::{Deserialize, Serialize};

/// Kind of resource a health record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    ScalingGroupInstance,
    Cluster,
    NodeGroup,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResourceKind::ScalingGroupInstance => "instance",
            ResourceKind::Cluster => "cluster",
            ResourceKind::NodeGroup => "node group",
        };
        f.write_str(name)
    }
}

/// Point-in-time status of one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceHealth {
    pub kind: ResourceKind,
    pub id: String,
    pub status: String,
}

/// Expected and observed status of a resource that failed its check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMismatch {
    pub kind: ResourceKind,
    pub id: String,
    pub expected: String,
    pub observed: String,
}

impl std::fmt::Display for StatusMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} is {:?}, expected {:?}",
            self.kind, self.id, self.observed, self.expected
        )
    }
}

/// How an observed status is compared to the expected one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusMatch {
    Exact,
    IgnoreAsciiCase,
}

impl StatusMatch {
    fn matches(self, expected: &str, observed: &str) -> bool {
        match self {
            StatusMatch::Exact => expected == observed,
            StatusMatch::IgnoreAsciiCase => expected.eq_ignore_ascii_case(observed),
        }
    }
}

/// Everything one verification call observed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub records: Vec<ResourceHealth>,
    pub mismatches: Vec<StatusMismatch>,
}

impl HealthReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `observed` for a resource and note a mismatch if it differs from `expected`.
    pub fn check(
        &mut self,
        kind: ResourceKind,
        id: &str,
        observed: &str,
        expected: &str,
        rule: StatusMatch,
    ) {
        if !rule.matches(expected, observed) {
            self.mismatches.push(StatusMismatch {
                kind,
                id: id.to_string(),
                expected: expected.to_string(),
                observed: observed.to_string(),
            });
        }
        self.records.push(ResourceHealth {
            kind,
            id: id.to_string(),
            status: observed.to_string(),
        });
    }

    pub fn is_healthy(&self) -> bool {
        self.mismatches.is_empty()
    }

    /// Fold another report's observations into this one.
    pub fn merge(&mut self, other: HealthReport) {
        self.records.extend(other.records);
        self.mismatches.extend(other.mismatches);
    }

    /// `Ok(self)` when every record matched, otherwise the collected mismatches.
    pub fn into_result(self) -> Result<Self> {
        if self.mismatches.is_empty() {
            Ok(self)
        } else {
            Err(HarnessError::AssertionMismatch(self.mismatches))
        }
    }
}
