//! Remediation planning for failed deployments.
//!
//! Turns a snapshot's health data into concrete operator commands: stale
//! failures get a shallow rewind, nondeterministic ones a restart, and
//! deterministic ones are listed but left alone since re-running the same
//! handlers reproduces the same error.

use graphwatch_core::{classify_failure, FailureCategory, HealthStatus, Snapshot};

/// Blocks rewound past the failure point for a stale deployment
const REWIND_DEPTH: u64 = 100;

/// One deployment's remediation step
#[derive(Debug, Clone)]
pub struct FixCommand {
    pub deployment: String,
    /// Empty when no allocation references the deployment
    pub subgraph_name: String,
    pub category: FailureCategory,
    /// `None` for failures no command can fix
    pub command: Option<String>,
}

/// Remediation steps for every failed deployment in a snapshot
#[derive(Debug, Clone, Default)]
pub struct FixPlan {
    pub commands: Vec<FixCommand>,
    /// The runnable commands joined into one shell script
    pub script: String,
}

impl FixPlan {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Build a remediation plan from the latest snapshot. Deployments without
/// health data (no status endpoint, exhausted batch) are skipped, never
/// guessed at.
pub fn build_fix_plan(snapshot: &Snapshot) -> FixPlan {
    let health = match &snapshot.health {
        Some(health) => health,
        None => return FixPlan::default(),
    };

    let mut commands: Vec<FixCommand> = Vec::new();
    for (deployment, status) in health {
        if status.health != HealthStatus::Failed {
            continue;
        }
        let category = classify_failure(status);
        let command = match category {
            FailureCategory::Stale => Some(match status.latest_block {
                Some(block) => format!(
                    "graphman rewind {deployment} --block {}",
                    block.saturating_sub(REWIND_DEPTH)
                ),
                // Without a block to rewind to, a restart is the best shot.
                None => format!("graphman restart {deployment}"),
            }),
            FailureCategory::Nondeterministic => Some(format!("graphman restart {deployment}")),
            FailureCategory::Deterministic => None,
        };
        let subgraph_name = snapshot
            .allocations
            .iter()
            .find(|a| &a.subgraph_deployment == deployment)
            .map(|a| a.subgraph_name.clone())
            .unwrap_or_default();
        commands.push(FixCommand {
            deployment: deployment.clone(),
            subgraph_name,
            category,
            command,
        });
    }
    // Deterministic iteration order for the script; HashMap order is not.
    commands.sort_by(|a, b| a.deployment.cmp(&b.deployment));

    let mut script = String::from("#!/bin/sh\nset -e\n");
    let fixable = commands.iter().filter(|c| c.command.is_some()).count();
    let skipped = commands.len() - fixable;
    script.push_str(&format!(
        "# {fixable} fixable deployment(s), {skipped} deterministic failure(s) need a code fix\n"
    ));
    for fix in commands.iter() {
        if let Some(command) = &fix.command {
            let label = if fix.subgraph_name.is_empty() {
                fix.deployment.clone()
            } else {
                fix.subgraph_name.clone()
            };
            script.push_str(&format!("echo '{}: {}'\n", label, fix.category.as_str()));
            script.push_str(command);
            script.push('\n');
        }
    }

    FixPlan { commands, script }
}
