//! infra-verify - run the GitLab runner infrastructure scenarios
//!
//! ## Commands
//!
//! - `ec2`: provision the Auto Scaling Group root, check every instance is in service, destroy
//! - `eks`: provision the EKS root, check cluster and node groups are active, destroy
//! - `names`: print a generated name pair

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use infra_verify::{
    Harness, HarnessConfig, NameGenerator, ScenarioConfig, ScenarioKind, ScenarioReport,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, Level};

#[derive(Parser)]
#[command(name = "infra-verify")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Provision, verify and destroy the GitLab runner infrastructure", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the EC2 Auto Scaling Group scenario
    Ec2(RunArgs),

    /// Run the EKS cluster scenario
    Eks(RunArgs),

    /// Print a generated name pair
    Names {
        /// Name prefix
        #[arg(short, long, default_value = "ec2-runner-go-")]
        prefix: String,

        /// Fixed RNG seed
        #[arg(long)]
        seed: Option<u64>,
    },
}

/// Overrides for the `INFRA_VERIFY_*` environment configuration.
#[derive(Args)]
struct RunArgs {
    /// AWS region
    #[arg(long)]
    region: Option<String>,

    /// Directory containing the `ec2/` and `eks/` Terraform roots
    #[arg(long)]
    deploy_root: Option<PathBuf>,

    /// Terraform binary
    #[arg(long)]
    terraform_bin: Option<PathBuf>,

    /// SSM parameter holding the runner token
    #[arg(long)]
    ssm_parameter: Option<String>,

    /// Fixed RNG seed for resource names
    #[arg(long)]
    seed: Option<u64>,

    /// Kill any Terraform command running longer than this
    #[arg(long)]
    timeout_secs: Option<u64>,
}

impl RunArgs {
    fn apply(self, mut config: HarnessConfig) -> HarnessConfig {
        if let Some(region) = self.region {
            config.region = region;
        }
        if let Some(root) = self.deploy_root {
            config.deploy_root = root;
        }
        if let Some(bin) = self.terraform_bin {
            config.terraform_bin = bin;
        }
        if let Some(parameter) = self.ssm_parameter {
            config.ssm_parameter = parameter;
        }
        if self.seed.is_some() {
            config.name_seed = self.seed;
        }
        if self.timeout_secs.is_some() {
            config.timeout_secs = self.timeout_secs;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    infra_verify::init_tracing(cli.json, level);

    match cli.command {
        Commands::Ec2(args) => cmd_run(ScenarioKind::Ec2, args).await,
        Commands::Eks(args) => cmd_run(ScenarioKind::Eks, args).await,
        Commands::Names { prefix, seed } => {
            cmd_names(&prefix, seed);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn cmd_run(kind: ScenarioKind, args: RunArgs) -> Result<ExitCode> {
    let config = args.apply(
        HarnessConfig::from_env().context("Failed to read INFRA_VERIFY_* configuration")?,
    );

    let scenario = ScenarioConfig::for_kind(kind, &config);
    if !scenario.working_dir.is_dir() {
        anyhow::bail!(
            "Terraform root {} does not exist",
            scenario.working_dir.display()
        );
    }

    let mut names = name_generator(config.name_seed);
    let report = Harness::from_config(&config).run(&scenario, &mut names).await;
    print_report(&report);

    Ok(if report.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn cmd_names(prefix: &str, seed: Option<u64>) {
    let identity = name_generator(seed).generate(prefix);
    println!("{}", identity.primary);
    println!("{}", identity.secondary);
}

fn name_generator(seed: Option<u64>) -> NameGenerator {
    match seed {
        Some(seed) => NameGenerator::seeded(seed),
        None => NameGenerator::from_clock(),
    }
}

fn print_report(report: &ScenarioReport) {
    let phases: Vec<String> = report.phases.iter().map(|p| p.to_string()).collect();
    info!(
        run_id = %report.run_id,
        scenario = %report.kind,
        project_name = %report.identity.primary,
        project_name_2 = %report.identity.secondary,
        phases = %phases.join(" -> "),
        duration_ms = report.duration_ms,
        "Scenario report"
    );

    if let Some(health) = &report.health {
        for record in &health.records {
            info!(kind = %record.kind, id = %record.id, status = %record.status, "Resource");
        }
    }
    if let Some(err) = &report.error {
        error!(error = %err, "Scenario failed");
    }
    if let Some(err) = &report.cleanup_error {
        error!(error = %err, "Destroy failed, check for leaked resources");
    }

    let verdict = if report.passed() { "PASS" } else { "FAIL" };
    println!("{verdict}  {}  {}", report.kind, report.run_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_args_override_config() {
        let cli = Cli::try_parse_from([
            "infra-verify",
            "eks",
            "--region",
            "eu-west-1",
            "--seed",
            "9",
            "--deploy-root",
            "/tmp/deploy",
        ])
        .unwrap();
        let Commands::Eks(args) = cli.command else {
            panic!("expected eks");
        };
        let config = args.apply(HarnessConfig::default());
        assert_eq!(config.region, "eu-west-1");
        assert_eq!(config.name_seed, Some(9));
        assert_eq!(config.deploy_root, PathBuf::from("/tmp/deploy"));
        assert_eq!(config.terraform_bin, PathBuf::from("terraform"));
    }

    #[test]
    fn test_names_defaults() {
        let cli = Cli::try_parse_from(["infra-verify", "names"]).unwrap();
        match cli.command {
            Commands::Names { prefix, seed } => {
                assert_eq!(prefix, "ec2-runner-go-");
                assert!(seed.is_none());
            }
            _ => panic!("expected names"),
        }
    }
}
