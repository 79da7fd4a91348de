//! Structured observability hooks for scenario runs.
//!
//! - [`scenario_span`] creates the run-scoped span every scenario is
//!   instrumented with.
//! - `emit_*` functions log the lifecycle events: phase transitions,
//!   scenario completion and leaked leases.

use std::path::Path;
use tracing::{error, info, Span};
use uuid::Uuid;

use crate::scenario::{Phase, ScenarioKind};

/// Span tagged with the run id and scenario kind.
pub fn scenario_span(run_id: &Uuid, kind: ScenarioKind) -> Span {
    tracing::info_span!("infra_verify.scenario", run_id = %run_id, scenario = %kind)
}

/// Emit event: scenario moved to `phase`.
pub fn emit_phase(phase: Phase) {
    info!(event = "scenario.phase", phase = %phase);
}

/// Emit event: scenario finished.
pub fn emit_scenario_finished(final_phase: Phase, duration_ms: u64, passed: bool) {
    info!(
        event = "scenario.finished",
        final_phase = %final_phase,
        duration_ms = duration_ms,
        passed = passed,
    );
}

/// Emit event: a lease was dropped without destroying its resources.
pub fn emit_lease_leaked(working_dir: &Path) {
    error!(
        event = "provision.lease_leaked",
        dir = %working_dir.display(),
        "Resources were not destroyed; clean up manually"
    );
}
