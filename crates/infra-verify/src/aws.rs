//! AWS SDK adapters for the harness traits.
//!
//! Each call builds a client for the requested region; nothing is cached
//! between calls.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use tracing::debug;

use crate::error::{HarnessError, Result};
use crate::secrets::{SecretStore, SecretValue};
use crate::verify::{ClusterDescriber, GroupInstance, ScalingGroup, ScalingGroupDescriber};

/// SSM, Auto Scaling and EKS access using the default credential chain.
#[derive(Debug, Clone, Default)]
pub struct AwsControlPlane;

impl AwsControlPlane {
    pub fn new() -> Self {
        Self
    }

    async fn sdk_config(region: &str) -> SdkConfig {
        aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await
    }
}

#[async_trait]
impl SecretStore for AwsControlPlane {
    async fn resolve(&self, parameter_name: &str, region: &str) -> Result<SecretValue> {
        let config = Self::sdk_config(region).await;
        let client = aws_sdk_ssm::Client::new(&config);

        let response = client
            .get_parameter()
            .name(parameter_name)
            .with_decryption(true)
            .send()
            .await
            .map_err(|e| HarnessError::Resolution {
                parameter: parameter_name.to_string(),
                message: aws_sdk_ssm::error::DisplayErrorContext(&e).to_string(),
            })?;

        let value = response
            .parameter()
            .and_then(|p| p.value())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| HarnessError::Resolution {
                parameter: parameter_name.to_string(),
                message: "parameter has no value".to_string(),
            })?;

        debug!(parameter = %parameter_name, region = %region, "Resolved parameter");
        Ok(SecretValue::new(value))
    }
}

#[async_trait]
impl ScalingGroupDescriber for AwsControlPlane {
    async fn describe_scaling_group(
        &self,
        name: &str,
        region: &str,
    ) -> Result<Option<ScalingGroup>> {
        let config = Self::sdk_config(region).await;
        let client = aws_sdk_autoscaling::Client::new(&config);

        let response = client
            .describe_auto_scaling_groups()
            .auto_scaling_group_names(name)
            .send()
            .await
            .map_err(|e| {
                HarnessError::describe(
                    format!("auto scaling group {name}"),
                    aws_sdk_autoscaling::error::DisplayErrorContext(&e).to_string(),
                )
            })?;

        let group = response.auto_scaling_groups().first().map(|group| ScalingGroup {
            name: group
                .auto_scaling_group_name()
                .unwrap_or(name)
                .to_string(),
            instances: group
                .instances()
                .iter()
                .map(|instance| GroupInstance {
                    instance_id: instance.instance_id().unwrap_or_default().to_string(),
                    lifecycle_state: instance
                        .lifecycle_state()
                        .map(|s| s.as_str().to_string())
                        .unwrap_or_default(),
                })
                .collect(),
        });
        Ok(group)
    }
}

#[async_trait]
impl ClusterDescriber for AwsControlPlane {
    async fn describe_cluster(&self, name: &str, region: &str) -> Result<String> {
        let config = Self::sdk_config(region).await;
        let client = aws_sdk_eks::Client::new(&config);

        let response = client
            .describe_cluster()
            .name(name)
            .send()
            .await
            .map_err(|e| {
                HarnessError::describe(
                    format!("cluster {name}"),
                    aws_sdk_eks::error::DisplayErrorContext(&e).to_string(),
                )
            })?;

        Ok(response
            .cluster()
            .and_then(|c| c.status())
            .map(|s| s.as_str().to_string())
            .unwrap_or_default())
    }

    async fn describe_node_group(&self, cluster: &str, name: &str, region: &str) -> Result<String> {
        let config = Self::sdk_config(region).await;
        let client = aws_sdk_eks::Client::new(&config);

        let response = client
            .describe_nodegroup()
            .cluster_name(cluster)
            .nodegroup_name(name)
            .send()
            .await
            .map_err(|e| {
                HarnessError::describe(
                    format!("node group {cluster}/{name}"),
                    aws_sdk_eks::error::DisplayErrorContext(&e).to_string(),
                )
            })?;

        Ok(response
            .nodegroup()
            .and_then(|ng| ng.status())
            .map(|s| s.as_str().to_string())
            .unwrap_or_default())
    }
}
