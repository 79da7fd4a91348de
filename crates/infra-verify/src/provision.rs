//! Provisioning requests, outputs and the apply/destroy lease.

use crate::error::{HarnessError, Result};
use crate::obs;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A single input variable.
#[derive(Clone, PartialEq, Eq)]
pub enum VarValue {
    /// Plain string (names, CIDR ranges, ...).
    Text(String),
    /// String that must not be logged.
    Sensitive(String),
    /// Tag-style `key -> value` mapping.
    Map(BTreeMap<String, String>),
}

impl VarValue {
    /// Plain string content, if this is a `Text` or `Sensitive` value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            VarValue::Text(s) | VarValue::Sensitive(s) => Some(s),
            VarValue::Map(_) => None,
        }
    }

    pub fn is_sensitive(&self) -> bool {
        matches!(self, VarValue::Sensitive(_))
    }
}

impl std::fmt::Debug for VarValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VarValue::Text(s) => f.debug_tuple("Text").field(s).finish(),
            VarValue::Sensitive(_) => f.write_str("Sensitive(***)"),
            VarValue::Map(m) => f.debug_tuple("Map").field(m).finish(),
        }
    }
}

/// Working directory plus input variables for one apply/destroy cycle.
///
/// Built once, then only read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningRequest {
    working_dir: PathBuf,
    vars: BTreeMap<String, VarValue>,
}

impl ProvisioningRequest {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            vars: BTreeMap::new(),
        }
    }

    pub fn var(mut self, name: &str, value: impl Into<String>) -> Self {
        self.vars
            .insert(name.to_string(), VarValue::Text(value.into()));
        self
    }

    pub fn sensitive_var(mut self, name: &str, value: impl Into<String>) -> Self {
        self.vars
            .insert(name.to_string(), VarValue::Sensitive(value.into()));
        self
    }

    pub fn map_var(mut self, name: &str, value: BTreeMap<String, String>) -> Self {
        self.vars.insert(name.to_string(), VarValue::Map(value));
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn vars(&self) -> &BTreeMap<String, VarValue> {
        &self.vars
    }

    pub fn get(&self, name: &str) -> Option<&VarValue> {
        self.vars.get(name)
    }
}

/// Outputs of a successful apply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProvisioningOutputs {
    values: BTreeMap<String, Value>,
}

impl ProvisioningOutputs {
    pub fn new(values: BTreeMap<String, Value>) -> Self {
        Self { values }
    }

    /// Read one output.
    ///
    /// String outputs come back unquoted; lists, maps and numbers come back as
    /// serialized JSON.
    pub fn get(&self, name: &str) -> Result<String> {
        match self.values.get(name) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(other) => Ok(other.to_string()),
            None => Err(HarnessError::OutputMissing(name.to_string())),
        }
    }

    /// Like [`get`](Self::get), but a null or empty value is an error too.
    pub fn require(&self, name: &str) -> Result<String> {
        if matches!(self.values.get(name), Some(Value::Null)) {
            return Err(HarnessError::EmptyResult(format!("terraform output {name}")));
        }
        let value = self.get(name)?;
        if value.is_empty() {
            return Err(HarnessError::EmptyResult(format!("terraform output {name}")));
        }
        Ok(value)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Infrastructure-as-code backend.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Initialise and apply `request`, returning its outputs.
    async fn apply(&self, request: &ProvisioningRequest) -> Result<ProvisioningOutputs>;

    /// Tear down everything `apply` created for `request`.
    async fn destroy(&self, request: &ProvisioningRequest) -> Result<()>;
}

/// Handle on resources that an apply may have created.
///
/// Take the lease before attempting apply; [`release`](Self::release) it on every
/// exit path. Release consumes the lease, so each lease issues at most one destroy.
pub struct ProvisionLease {
    provisioner: Arc<dyn Provisioner>,
    request: ProvisioningRequest,
    released: bool,
}

impl ProvisionLease {
    pub fn new(provisioner: Arc<dyn Provisioner>, request: ProvisioningRequest) -> Self {
        Self {
            provisioner,
            request,
            released: false,
        }
    }

    pub fn request(&self) -> &ProvisioningRequest {
        &self.request
    }

    pub async fn apply(&self) -> Result<ProvisioningOutputs> {
        self.provisioner.apply(&self.request).await
    }

    /// Destroy with the same variables the apply used.
    pub async fn release(mut self) -> Result<()> {
        let result = self.provisioner.destroy(&self.request).await;
        self.released = true;
        result
    }
}

impl Drop for ProvisionLease {
    fn drop(&mut self) {
        if !self.released {
            obs::emit_lease_leaked(self.request.working_dir());
        }
    }
}
