//! In-memory fakes for the harness traits (testing only)
//!
//! Provides `MemorySecretStore`, `StaticScalingGroups`, `StaticClusters`, and
//! `FakeCloud`, which satisfy the trait contracts without touching AWS or
//! Terraform.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{HarnessError, Result};
use crate::provision::{Provisioner, ProvisioningOutputs, ProvisioningRequest};
use crate::secrets::{SecretStore, SecretValue};
use crate::verify::{ClusterDescriber, GroupInstance, ScalingGroup, ScalingGroupDescriber};

// ---------------------------------------------------------------------------
// MemorySecretStore
// ---------------------------------------------------------------------------

/// Parameter store backed by a `HashMap<(region, name), value>`.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    params: HashMap<(String, String), String>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parameter(mut self, region: &str, name: &str, value: &str) -> Self {
        self.params
            .insert((region.to_string(), name.to_string()), value.to_string());
        self
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn resolve(&self, parameter_name: &str, region: &str) -> Result<SecretValue> {
        match self
            .params
            .get(&(region.to_string(), parameter_name.to_string()))
        {
            Some(value) if !value.is_empty() => Ok(SecretValue::new(value.clone())),
            Some(_) => Err(HarnessError::Resolution {
                parameter: parameter_name.to_string(),
                message: "parameter has no value".to_string(),
            }),
            None => Err(HarnessError::Resolution {
                parameter: parameter_name.to_string(),
                message: "ParameterNotFound".to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// StaticScalingGroups
// ---------------------------------------------------------------------------

/// Fixed set of scaling groups.
#[derive(Debug, Default)]
pub struct StaticScalingGroups {
    groups: HashMap<String, ScalingGroup>,
    failure: Option<String>,
}

impl StaticScalingGroups {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_group(mut self, group: ScalingGroup) -> Self {
        self.groups.insert(group.name.clone(), group);
        self
    }

    /// Make every describe call fail with `message`.
    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }
}

#[async_trait]
impl ScalingGroupDescriber for StaticScalingGroups {
    async fn describe_scaling_group(
        &self,
        name: &str,
        _region: &str,
    ) -> Result<Option<ScalingGroup>> {
        if let Some(message) = &self.failure {
            return Err(HarnessError::describe(
                format!("auto scaling group {name}"),
                message.clone(),
            ));
        }
        Ok(self.groups.get(name).cloned())
    }
}

// ---------------------------------------------------------------------------
// StaticClusters
// ---------------------------------------------------------------------------

/// Fixed set of clusters and node groups; records node group describe calls.
#[derive(Debug, Default)]
pub struct StaticClusters {
    clusters: HashMap<String, String>,
    node_groups: HashMap<(String, String), String>,
    described: Mutex<Vec<String>>,
}

impl StaticClusters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cluster(mut self, name: &str, status: &str) -> Self {
        self.clusters.insert(name.to_string(), status.to_string());
        self
    }

    pub fn with_node_group(mut self, cluster: &str, name: &str, status: &str) -> Self {
        self.node_groups
            .insert((cluster.to_string(), name.to_string()), status.to_string());
        self
    }

    /// Node group names in the order they were described.
    pub fn described(&self) -> Vec<String> {
        self.described.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClusterDescriber for StaticClusters {
    async fn describe_cluster(&self, name: &str, _region: &str) -> Result<String> {
        self.clusters
            .get(name)
            .cloned()
            .ok_or_else(|| HarnessError::describe(format!("cluster {name}"), "ResourceNotFoundException"))
    }

    async fn describe_node_group(&self, cluster: &str, name: &str, _region: &str) -> Result<String> {
        self.described.lock().unwrap().push(name.to_string());
        self.node_groups
            .get(&(cluster.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| {
                HarnessError::describe(
                    format!("node group {cluster}/{name}"),
                    "ResourceNotFoundException",
                )
            })
    }
}

// ---------------------------------------------------------------------------
// FakeCloud
// ---------------------------------------------------------------------------

/// What a [`FakeCloud`] apply creates.
#[derive(Debug, Clone)]
pub enum FakeStack {
    /// One scaling group named `<project_name>-asg` with these instance states.
    ScalingGroup { instance_states: Vec<String> },
    /// One cluster named `<project_name>` with these `(name, status)` node groups.
    Cluster {
        status: String,
        node_groups: Vec<(String, String)>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApplyBehavior {
    Succeed,
    /// Resources are created, then apply reports an error.
    Fail,
    /// Resources are created, then apply panics.
    Panic,
}

#[derive(Debug, Default)]
struct CloudState {
    groups: HashMap<String, ScalingGroup>,
    clusters: HashMap<String, String>,
    node_groups: HashMap<(String, String), String>,
    owners: HashMap<String, HashSet<String>>,
    applies: usize,
    destroys: usize,
}

/// Provisioner and control plane sharing one resource table, so apply creates
/// describable resources and destroy removes them.
#[derive(Debug)]
pub struct FakeCloud {
    stack: FakeStack,
    apply: ApplyBehavior,
    destroy_failure: Option<String>,
    state: Mutex<CloudState>,
}

impl FakeCloud {
    pub fn new(stack: FakeStack) -> Self {
        Self {
            stack,
            apply: ApplyBehavior::Succeed,
            destroy_failure: None,
            state: Mutex::new(CloudState::default()),
        }
    }

    pub fn scaling_group(states: &[&str]) -> Self {
        Self::new(FakeStack::ScalingGroup {
            instance_states: states.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn cluster(status: &str, node_groups: &[(&str, &str)]) -> Self {
        Self::new(FakeStack::Cluster {
            status: status.to_string(),
            node_groups: node_groups
                .iter()
                .map(|(n, s)| (n.to_string(), s.to_string()))
                .collect(),
        })
    }

    pub fn failing_apply(mut self) -> Self {
        self.apply = ApplyBehavior::Fail;
        self
    }

    pub fn panicking_apply(mut self) -> Self {
        self.apply = ApplyBehavior::Panic;
        self
    }

    pub fn failing_destroy(mut self, message: &str) -> Self {
        self.destroy_failure = Some(message.to_string());
        self
    }

    pub fn apply_count(&self) -> usize {
        self.state.lock().unwrap().applies
    }

    pub fn destroy_count(&self) -> usize {
        self.state.lock().unwrap().destroys
    }

    /// Number of resources currently alive across all projects.
    pub fn live_resources(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.groups.len() + state.clusters.len() + state.node_groups.len()
    }

    fn project_name(request: &ProvisioningRequest) -> Result<String> {
        request
            .get("project_name")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| HarnessError::provisioning("apply", "variable project_name is not set"))
    }

    fn create(&self, project: &str) -> ProvisioningOutputs {
        let mut state = self.state.lock().unwrap();
        state.applies += 1;
        let mut outputs = std::collections::BTreeMap::new();
        let mut owned = HashSet::new();

        match &self.stack {
            FakeStack::ScalingGroup { instance_states } => {
                let name = format!("{project}-asg");
                let instances = instance_states
                    .iter()
                    .enumerate()
                    .map(|(i, s)| GroupInstance {
                        instance_id: format!("i-{project}-{i}"),
                        lifecycle_state: s.clone(),
                    })
                    .collect();
                state.groups.insert(
                    name.clone(),
                    ScalingGroup {
                        name: name.clone(),
                        instances,
                    },
                );
                owned.insert(name.clone());
                outputs.insert("asg_name".to_string(), Value::String(name));
            }
            FakeStack::Cluster {
                status,
                node_groups,
            } => {
                state.clusters.insert(project.to_string(), status.clone());
                owned.insert(project.to_string());
                for (name, ng_status) in node_groups {
                    state
                        .node_groups
                        .insert((project.to_string(), name.clone()), ng_status.clone());
                }
                let names: Vec<&String> = node_groups.iter().map(|(n, _)| n).collect();
                outputs.insert("cluster_name".to_string(), Value::String(project.to_string()));
                outputs.insert("self_managed_node_groups".to_string(), json!(names));
            }
        }

        state.owners.insert(project.to_string(), owned);
        ProvisioningOutputs::new(outputs)
    }
}

#[async_trait]
impl Provisioner for FakeCloud {
    async fn apply(&self, request: &ProvisioningRequest) -> Result<ProvisioningOutputs> {
        let project = Self::project_name(request)?;
        let outputs = self.create(&project);
        match self.apply {
            ApplyBehavior::Succeed => Ok(outputs),
            ApplyBehavior::Fail => Err(HarnessError::provisioning(
                "apply",
                "Error: waiting for capacity: timeout",
            )),
            ApplyBehavior::Panic => panic!("fake apply panicked for {project}"),
        }
    }

    async fn destroy(&self, request: &ProvisioningRequest) -> Result<()> {
        let project = Self::project_name(request)?;
        let mut state = self.state.lock().unwrap();
        state.destroys += 1;
        if let Some(message) = &self.destroy_failure {
            return Err(HarnessError::provisioning("destroy", message.clone()));
        }

        if let Some(owned) = state.owners.remove(&project) {
            for name in owned {
                state.groups.remove(&name);
                state.clusters.remove(&name);
            }
        }
        state.node_groups.retain(|(cluster, _), _| cluster != &project);
        Ok(())
    }
}

#[async_trait]
impl ScalingGroupDescriber for FakeCloud {
    async fn describe_scaling_group(
        &self,
        name: &str,
        _region: &str,
    ) -> Result<Option<ScalingGroup>> {
        Ok(self.state.lock().unwrap().groups.get(name).cloned())
    }
}

#[async_trait]
impl ClusterDescriber for FakeCloud {
    async fn describe_cluster(&self, name: &str, _region: &str) -> Result<String> {
        self.state
            .lock()
            .unwrap()
            .clusters
            .get(name)
            .cloned()
            .ok_or_else(|| HarnessError::describe(format!("cluster {name}"), "ResourceNotFoundException"))
    }

    async fn describe_node_group(&self, cluster: &str, name: &str, _region: &str) -> Result<String> {
        self.state
            .lock()
            .unwrap()
            .node_groups
            .get(&(cluster.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| {
                HarnessError::describe(
                    format!("node group {cluster}/{name}"),
                    "ResourceNotFoundException",
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(project: &str) -> ProvisioningRequest {
        ProvisioningRequest::new("deploy/ec2").var("project_name", project)
    }

    #[tokio::test]
    async fn test_memory_secret_store() {
        let store = MemorySecretStore::new().with_parameter("us-east-1", "/forge/token", "glrt-1");
        let value = store.resolve("/forge/token", "us-east-1").await.unwrap();
        assert_eq!(value.expose(), "glrt-1");

        let err = store.resolve("/forge/token", "eu-west-1").await.unwrap_err();
        assert!(matches!(err, HarnessError::Resolution { .. }));
    }

    #[tokio::test]
    async fn test_apply_then_destroy_leaves_nothing() {
        let cloud = FakeCloud::scaling_group(&["InService", "InService"]);
        let outputs = cloud.apply(&request("ec2-runner-go-41203")).await.unwrap();
        let asg = outputs.get("asg_name").unwrap();
        assert!(cloud.describe_scaling_group(&asg, "us-east-1").await.unwrap().is_some());

        cloud.destroy(&request("ec2-runner-go-41203")).await.unwrap();
        assert!(cloud.describe_scaling_group(&asg, "us-east-1").await.unwrap().is_none());
        assert_eq!(cloud.live_resources(), 0);
    }

    #[tokio::test]
    async fn test_cluster_outputs_node_group_list() {
        let cloud = FakeCloud::cluster("ACTIVE", &[("ng-a", "ACTIVE"), ("ng-b", "ACTIVE")]);
        let outputs = cloud.apply(&request("eks-runner-go-1")).await.unwrap();
        assert_eq!(outputs.get("cluster_name").unwrap(), "eks-runner-go-1");
        assert_eq!(outputs.get("self_managed_node_groups").unwrap(), r#"["ng-a","ng-b"]"#);
        assert_eq!(cloud.live_resources(), 3);
    }

    #[tokio::test]
    async fn test_failing_apply_still_creates() {
        let cloud = FakeCloud::scaling_group(&["InService"]).failing_apply();
        assert!(cloud.apply(&request("p")).await.is_err());
        assert_eq!(cloud.live_resources(), 1);
    }
}
