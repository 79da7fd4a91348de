//! Live scenarios against AWS and the real Terraform roots.
//!
//! These tests create billable resources. They are `#[ignore]`d and only run with:
//! ```text
//! INFRA_VERIFY_E2E=1 INFRA_VERIFY_DEPLOY_ROOT=/path/to/deploy \
//!     cargo test -p infra-verify --test live_scenarios -- --ignored
//! ```
//!
//! Both scenarios run concurrently under the default test runner; they use
//! separate Terraform roots and distinct generated names.

use infra_verify::{
    init_tracing, Harness, HarnessConfig, NameGenerator, ScenarioConfig, ScenarioKind,
};
use std::env;
use tracing::{info, Level};

fn should_run_e2e() -> bool {
    env::var("INFRA_VERIFY_E2E").is_ok()
}

macro_rules! require_e2e {
    () => {
        if !should_run_e2e() {
            eprintln!("Skipping live scenario. Set INFRA_VERIFY_E2E=1 to run");
            return;
        }
    };
}

async fn run_live(kind: ScenarioKind) {
    init_tracing(false, Level::INFO);

    let config = HarnessConfig::from_env().expect("invalid INFRA_VERIFY_* configuration");
    let scenario = ScenarioConfig::for_kind(kind, &config);
    let mut names = match config.name_seed {
        Some(seed) => NameGenerator::seeded(seed),
        None => NameGenerator::from_clock(),
    };

    let report = Harness::from_config(&config).run(&scenario, &mut names).await;
    info!(
        run_id = %report.run_id,
        phases = ?report.phases,
        duration_ms = report.duration_ms,
        "Live scenario finished"
    );

    let health = report
        .into_result()
        .unwrap_or_else(|e| panic!("{kind} scenario failed: {e}"));
    assert!(!health.records.is_empty());
}

#[tokio::test]
#[ignore]
async fn test_ec2_runners_in_service() {
    require_e2e!();
    run_live(ScenarioKind::Ec2).await;
}

#[tokio::test]
#[ignore]
async fn test_eks_cluster_and_node_groups_active() {
    require_e2e!();
    run_live(ScenarioKind::Eks).await;
}
