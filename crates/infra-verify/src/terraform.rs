//! Terraform CLI driver.
//!
//! Runs `init`, `apply`, `output` and `destroy` as child processes against a
//! request's working directory.

use crate::error::{HarnessError, Result};
use crate::provision::{Provisioner, ProvisioningOutputs, ProvisioningRequest, VarValue};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Time allowed for terraform to exit after SIGINT.
pub const DEFAULT_INTERRUPT_GRACE: Duration = Duration::from_secs(60);

/// How long apply and destroy wait for the state lock.
const LOCK_TIMEOUT: &str = "-lock-timeout=5m";

/// One entry of `terraform output -json`.
#[derive(Debug, Deserialize)]
struct OutputEntry {
    value: Value,
    #[serde(default)]
    sensitive: bool,
}

/// [`Provisioner`] backed by the `terraform` binary.
#[derive(Debug, Clone)]
pub struct TerraformCli {
    binary: PathBuf,
    timeout: Option<Duration>,
    interrupt_grace: Duration,
}

impl Default for TerraformCli {
    fn default() -> Self {
        Self::new("terraform")
    }
}

impl TerraformCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            timeout: None,
            interrupt_grace: DEFAULT_INTERRUPT_GRACE,
        }
    }

    /// Interrupt any single terraform command that runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// How long an interrupted command may take to persist state and release
    /// its lock before it is killed.
    pub fn with_interrupt_grace(mut self, grace: Duration) -> Self {
        self.interrupt_grace = grace;
        self
    }

    async fn run(&self, action: &str, dir: &Path, args: &[String]) -> Result<String> {
        let start = Instant::now();
        debug!(action = %action, dir = %dir.display(), "Running terraform");

        let mut child = Command::new(&self.binary)
            .args(args)
            .current_dir(dir)
            .env("TF_IN_AUTOMATION", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                HarnessError::provisioning(
                    action,
                    format!("failed to spawn {}: {}", self.binary.display(), e),
                )
            })?;

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let finished = {
            let collect = async {
                tokio::try_join!(child.wait(), read_pipe(&mut stdout), read_pipe(&mut stderr))
            };
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, collect).await.ok(),
                None => Some(collect.await),
            }
        };

        let Some(finished) = finished else {
            let limit = self.timeout.unwrap_or_default();
            warn!(action = %action, limit = ?limit, "terraform timed out, interrupting");
            interrupt(&mut child, self.interrupt_grace).await;
            return Err(HarnessError::provisioning(
                action,
                format!("timed out after {:?}", limit),
            ));
        };
        let (status, stdout, stderr) = finished?;

        let duration_ms = start.elapsed().as_millis() as u64;
        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            let code = status.code().unwrap_or(-1);
            return Err(HarnessError::provisioning(
                action,
                format!("exit code {}: {}", code, stderr.trim()),
            ));
        }

        info!(action = %action, duration_ms = duration_ms, "terraform finished");
        Ok(String::from_utf8_lossy(&stdout).to_string())
    }

    async fn read_outputs(&self, dir: &Path) -> Result<ProvisioningOutputs> {
        let stdout = self
            .run("output", dir, &strings(&["output", "-json", "-no-color"]))
            .await?;
        parse_outputs(&stdout)
    }
}

#[async_trait]
impl Provisioner for TerraformCli {
    async fn apply(&self, request: &ProvisioningRequest) -> Result<ProvisioningOutputs> {
        let dir = request.working_dir();
        info!(
            dir = %dir.display(),
            vars = ?request.vars().keys().collect::<Vec<_>>(),
            "terraform init and apply"
        );

        self.run(
            "init",
            dir,
            &strings(&["init", "-input=false", "-upgrade=false", "-no-color"]),
        )
        .await?;

        let mut args = strings(&["apply", "-input=false", "-auto-approve", "-lock=true", LOCK_TIMEOUT, "-no-color"]);
        args.extend(var_args(request));
        self.run("apply", dir, &args).await?;

        self.read_outputs(dir).await
    }

    async fn destroy(&self, request: &ProvisioningRequest) -> Result<()> {
        let dir = request.working_dir();
        info!(dir = %dir.display(), "terraform destroy");

        let mut args = strings(&["destroy", "-input=false", "-auto-approve", "-lock=true", LOCK_TIMEOUT, "-no-color"]);
        args.extend(var_args(request));
        self.run("destroy", dir, &args).await?;
        Ok(())
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: &mut Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

/// Stop a timed-out command: SIGINT, wait up to `grace`, then SIGKILL.
///
/// Terraform only writes partial state and releases its lock when it is
/// interrupted, so the kill is the last resort.
#[cfg(unix)]
async fn interrupt(child: &mut Child, grace: Duration) {
    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return;
    };
    if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGINT) {
        if e != Errno::ESRCH {
            warn!(pid, error = ?e, "SIGINT to terraform failed");
        }
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => debug!(pid, status = ?status, "terraform exited after interrupt"),
        Err(_) => {
            warn!(pid, grace = ?grace, "terraform ignored interrupt, killing");
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}

#[cfg(not(unix))]
async fn interrupt(child: &mut Child, _grace: Duration) {
    let _ = child.start_kill();
    let _ = child.wait().await;
}

/// Parse `terraform output -json` into outputs.
pub fn parse_outputs(raw: &str) -> Result<ProvisioningOutputs> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(ProvisioningOutputs::default());
    }

    let entries: BTreeMap<String, OutputEntry> =
        serde_json::from_str(trimmed).map_err(|source| HarnessError::Decode {
            what: "terraform output".to_string(),
            source,
        })?;

    let values = entries
        .into_iter()
        .map(|(name, entry)| {
            if entry.sensitive {
                debug!(output = %name, "Read sensitive output");
            }
            (name, entry.value)
        })
        .collect();
    Ok(ProvisioningOutputs::new(values))
}

/// `-var name=value` pairs for every request variable.
fn var_args(request: &ProvisioningRequest) -> Vec<String> {
    let mut args = Vec::with_capacity(request.vars().len() * 2);
    for (name, value) in request.vars() {
        args.push("-var".to_string());
        args.push(format!("{}={}", name, render_value(value)));
    }
    args
}

fn render_value(value: &VarValue) -> String {
    match value {
        VarValue::Text(s) | VarValue::Sensitive(s) => s.clone(),
        VarValue::Map(map) => render_hcl_map(map),
    }
}

/// HCL object literal, e.g. `{"Owner" = "platform", "t_dcl" = "3"}`.
fn render_hcl_map(map: &BTreeMap<String, String>) -> String {
    let pairs: Vec<String> = map
        .iter()
        .map(|(k, v)| {
            format!(
                "{} = {}",
                Value::String(k.clone()),
                Value::String(v.clone())
            )
        })
        .collect();
    format!("{{{}}}", pairs.join(", "))
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags() -> BTreeMap<String, String> {
        let mut tags = BTreeMap::new();
        tags.insert("t_AppID".to_string(), "SVC03377".to_string());
        tags.insert("t_dcl".to_string(), "3".to_string());
        tags
    }

    #[test]
    fn test_render_hcl_map() {
        assert_eq!(
            render_hcl_map(&tags()),
            r#"{"t_AppID" = "SVC03377", "t_dcl" = "3"}"#
        );
    }

    #[test]
    fn test_render_hcl_map_escapes_quotes() {
        let mut map = BTreeMap::new();
        map.insert("note".to_string(), "say \"hi\"".to_string());
        assert_eq!(render_hcl_map(&map), r#"{"note" = "say \"hi\""}"#);
    }

    #[test]
    fn test_var_args() {
        let request = ProvisioningRequest::new("deploy/ec2")
            .var("project_name", "ec2-runner-go-41203")
            .var("vpc_cidr_block", "114.0.0.0/24")
            .map_var("tags", tags());

        let args = var_args(&request);
        assert_eq!(
            args,
            vec![
                "-var",
                "project_name=ec2-runner-go-41203",
                "-var",
                r#"tags={"t_AppID" = "SVC03377", "t_dcl" = "3"}"#,
                "-var",
                "vpc_cidr_block=114.0.0.0/24",
            ]
        );
    }

    #[test]
    fn test_parse_outputs() {
        let raw = r#"{
            "asg_name": {"sensitive": false, "type": "string", "value": "ec2-runner-go-41203-asg"},
            "self_managed_node_groups": {"sensitive": false, "type": ["list", "string"], "value": ["ng-1"]}
        }"#;
        let outputs = parse_outputs(raw).unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs.get("asg_name").unwrap(), "ec2-runner-go-41203-asg");
        assert_eq!(outputs.get("self_managed_node_groups").unwrap(), r#"["ng-1"]"#);
    }

    #[test]
    fn test_parse_outputs_empty_state() {
        assert!(parse_outputs("{}\n").unwrap().is_empty());
        assert!(parse_outputs("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_outputs_rejects_garbage() {
        let err = parse_outputs("Warning: no outputs").unwrap_err();
        assert!(matches!(err, HarnessError::Decode { .. }));
    }

    #[cfg(unix)]
    mod cli {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::TempDir;

        /// Stand-in terraform that logs its arguments and prints canned output.
        fn fake_terraform(dir: &Path, apply_exit: i32) -> PathBuf {
            let script = format!(
                r#"#!/bin/sh
echo "$@" >> "{log}"
case "$1" in
  apply)
    if [ {code} -ne 0 ]; then echo "Error: creating Auto Scaling Group" >&2; exit {code}; fi ;;
  output)
    echo '{{"asg_name":{{"sensitive":false,"type":"string","value":"ec2-runner-go-41203-asg"}}}}' ;;
esac
exit 0
"#,
                log = dir.join("calls.log").display(),
                code = apply_exit,
            );
            let path = dir.join("terraform");
            std::fs::write(&path, script).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        /// Stand-in terraform whose apply hangs until interrupted.
        ///
        /// With `honour_interrupt` it records `interrupted` and exits on SIGINT;
        /// otherwise it ignores SIGINT and has to be killed.
        fn hanging_terraform(dir: &Path, honour_interrupt: bool) -> PathBuf {
            let log = dir.join("calls.log");
            let on_int = if honour_interrupt {
                format!("echo interrupted >> \"{}\"; exit 130", log.display())
            } else {
                String::new()
            };
            let script = format!(
                r#"#!/bin/sh
echo "$@" >> "{log}"
case "$1" in
  apply)
    trap '{on_int}' INT
    sleep 10 >/dev/null 2>&1 &
    wait $!
    ;;
esac
exit 0
"#,
                log = log.display(),
                on_int = on_int,
            );
            let path = dir.join("terraform");
            std::fs::write(&path, script).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn calls(dir: &Path) -> Vec<String> {
            std::fs::read_to_string(dir.join("calls.log"))
                .unwrap_or_default()
                .lines()
                .map(str::to_string)
                .collect()
        }

        fn request(dir: &TempDir) -> ProvisioningRequest {
            ProvisioningRequest::new(dir.path())
                .var("project_name", "ec2-runner-go-41203")
                .sensitive_var("gitlab_runner_token", "glrt-token")
        }

        #[tokio::test]
        async fn test_apply_runs_init_apply_output() {
            let bin = tempfile::tempdir().unwrap();
            let work = tempfile::tempdir().unwrap();
            let tf = TerraformCli::new(fake_terraform(bin.path(), 0));

            let outputs = tf.apply(&request(&work)).await.expect("apply");
            assert_eq!(outputs.get("asg_name").unwrap(), "ec2-runner-go-41203-asg");

            let calls = calls(bin.path());
            assert_eq!(calls.len(), 3);
            assert!(calls[0].starts_with("init -input=false"));
            assert!(calls[1].starts_with("apply -input=false -auto-approve"));
            assert!(calls[1].contains("-var project_name=ec2-runner-go-41203"));
            assert!(calls[1].contains("-var gitlab_runner_token=glrt-token"));
            assert!(calls[2].starts_with("output -json"));
        }

        #[tokio::test]
        async fn test_apply_failure_carries_stderr() {
            let bin = tempfile::tempdir().unwrap();
            let work = tempfile::tempdir().unwrap();
            let tf = TerraformCli::new(fake_terraform(bin.path(), 1));

            let err = tf.apply(&request(&work)).await.unwrap_err();
            match err {
                HarnessError::Provisioning { action, message } => {
                    assert_eq!(action, "apply");
                    assert!(message.contains("creating Auto Scaling Group"));
                }
                other => panic!("unexpected error: {other}"),
            }
            // No output read after a failed apply.
            assert_eq!(calls(bin.path()).len(), 2);
        }

        #[tokio::test]
        async fn test_destroy_passes_same_vars() {
            let bin = tempfile::tempdir().unwrap();
            let work = tempfile::tempdir().unwrap();
            let tf = TerraformCli::new(fake_terraform(bin.path(), 0));

            tf.destroy(&request(&work)).await.expect("destroy");
            let calls = calls(bin.path());
            assert_eq!(calls.len(), 1);
            assert!(calls[0].starts_with("destroy -input=false -auto-approve"));
            assert!(calls[0].contains("-lock-timeout=5m"));
            assert!(calls[0].contains("-var project_name=ec2-runner-go-41203"));
        }

        #[tokio::test]
        async fn test_timed_out_apply_is_interrupted() {
            let bin = tempfile::tempdir().unwrap();
            let work = tempfile::tempdir().unwrap();
            let tf = TerraformCli::new(hanging_terraform(bin.path(), true))
                .with_timeout(Duration::from_millis(300))
                .with_interrupt_grace(Duration::from_secs(5));

            let start = Instant::now();
            let err = tf.apply(&request(&work)).await.unwrap_err();
            assert!(start.elapsed() < Duration::from_secs(5));

            match err {
                HarnessError::Provisioning { action, message } => {
                    assert_eq!(action, "apply");
                    assert_eq!(message, "timed out after 300ms");
                }
                other => panic!("unexpected error: {other}"),
            }
            assert_eq!(calls(bin.path()).last().map(String::as_str), Some("interrupted"));
        }

        #[tokio::test]
        async fn test_ignored_interrupt_is_killed_after_grace() {
            let bin = tempfile::tempdir().unwrap();
            let work = tempfile::tempdir().unwrap();
            let tf = TerraformCli::new(hanging_terraform(bin.path(), false))
                .with_timeout(Duration::from_millis(200))
                .with_interrupt_grace(Duration::from_millis(300));

            let start = Instant::now();
            let err = tf.apply(&request(&work)).await.unwrap_err();
            assert!(start.elapsed() < Duration::from_secs(5));
            assert!(matches!(err, HarnessError::Provisioning { action, .. } if action == "apply"));
            assert!(!calls(bin.path()).iter().any(|c| c == "interrupted"));
        }

        #[tokio::test]
        async fn test_timed_out_scenario_still_destroys_once() {
            use crate::config::HarnessConfig;
            use crate::fakes::{FakeCloud, MemorySecretStore};
            use crate::naming::NameGenerator;
            use crate::scenario::{Harness, Phase, ScenarioConfig};
            use std::sync::Arc;

            let bin = tempfile::tempdir().unwrap();
            let work = tempfile::tempdir().unwrap();
            let config = HarnessConfig::default();
            let tf = TerraformCli::new(hanging_terraform(bin.path(), true))
                .with_timeout(Duration::from_millis(300))
                .with_interrupt_grace(Duration::from_secs(5));
            let secrets = MemorySecretStore::new().with_parameter(
                &config.region,
                &config.ssm_parameter,
                "glrt-token",
            );
            let cloud = Arc::new(FakeCloud::scaling_group(&["InService"]));
            let harness = Harness::new(Arc::new(secrets), Arc::new(tf), cloud.clone(), cloud);

            let mut scenario = ScenarioConfig::ec2(&config);
            scenario.working_dir = work.path().to_path_buf();
            let report = harness.run(&scenario, &mut NameGenerator::seeded(11)).await;

            assert!(matches!(
                &report.error,
                Some(HarnessError::Provisioning { action, .. }) if action == "apply"
            ));
            assert_eq!(report.final_phase(), Phase::Destroyed);
            let destroys = calls(bin.path())
                .iter()
                .filter(|c| c.starts_with("destroy "))
                .count();
            assert_eq!(destroys, 1);
        }

        #[tokio::test]
        async fn test_missing_binary_is_provisioning_error() {
            let work = tempfile::tempdir().unwrap();
            let tf = TerraformCli::new(work.path().join("no-such-terraform"));
            let err = tf.destroy(&request(&work)).await.unwrap_err();
            assert!(matches!(err, HarnessError::Provisioning { .. }));
        }
    }
}
