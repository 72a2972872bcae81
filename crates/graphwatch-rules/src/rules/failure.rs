//! Failed deployments, split into three rule variants by failure category.
//!
//! One detector parameterized by category backs all three type tags. Health
//! data is best-effort: when the snapshot has no health map the rule reports
//! not-triggered rather than erroring.

use crate::registry::RuleKind;
use crate::{Rule, RuleContext, RuleOutcome};
use graphwatch_core::{classify_failure, FailureCategory, HealthStatus, Notification, Severity};
use serde_json::json;

pub struct DeploymentFailure {
    category: FailureCategory,
}

impl DeploymentFailure {
    pub fn new(category: FailureCategory) -> Self {
        Self { category }
    }

    fn severity(&self) -> Severity {
        match self.category {
            // Stale failures clear with a shallow rewind; the others need eyes.
            FailureCategory::Stale => Severity::Warning,
            FailureCategory::Deterministic | FailureCategory::Nondeterministic => {
                Severity::Critical
            }
        }
    }
}

impl Rule for DeploymentFailure {
    fn kind(&self) -> RuleKind {
        match self.category {
            FailureCategory::Stale => RuleKind::DeploymentFailedStale,
            FailureCategory::Deterministic => RuleKind::DeploymentFailedDeterministic,
            FailureCategory::Nondeterministic => RuleKind::DeploymentFailedNondeterministic,
        }
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> RuleOutcome {
        let health_map = match &ctx.snapshot.health {
            Some(map) => map,
            None => {
                return RuleOutcome::not_triggered().with_summary("no health data, skipped")
            }
        };

        let mut failed = 0usize;
        let mut notifications = Vec::new();
        // Findings are keyed per deployment; two allocations on the same
        // deployment must not double-fire one condition.
        let mut seen = std::collections::HashSet::new();
        for alloc in &ctx.snapshot.allocations {
            if !seen.insert(alloc.subgraph_deployment.as_str()) {
                continue;
            }
            let health = match health_map.get(&alloc.subgraph_deployment) {
                Some(health) => health,
                None => continue,
            };
            if health.health != HealthStatus::Failed {
                continue;
            }
            failed += 1;
            if classify_failure(health) != self.category {
                continue;
            }
            let error_message = health
                .fatal_error
                .as_ref()
                .map(|e| e.message.clone())
                .unwrap_or_default();
            let block_number = health.fatal_error.as_ref().and_then(|e| e.block_number);
            let notification = Notification::new(
                &ctx.rule.id,
                format!(
                    "{} failed ({})",
                    alloc.subgraph_name,
                    self.category.as_str()
                ),
                match self.category {
                    FailureCategory::Stale => format!(
                        "{} reports a failure but is synced to chain head; a shallow rewind should clear it",
                        alloc.subgraph_name
                    ),
                    _ => format!("{} failed: {error_message}", alloc.subgraph_name),
                },
                self.severity(),
            )
            .with_metadata(json!({
                "subgraphName": alloc.subgraph_name,
                "ipfsHash": alloc.subgraph_deployment,
                "category": self.category.as_str(),
                "subgraphs": [{
                    "name": alloc.subgraph_name,
                    "ipfsHash": alloc.subgraph_deployment,
                    "category": self.category.as_str(),
                    "error": error_message,
                    "blockNumber": block_number,
                }],
            }));
            notifications.push(notification);
        }

        let summary = format!(
            "{} deployments with health data, {failed} failed, {} classified {}",
            health_map.len(),
            notifications.len(),
            self.category.as_str()
        );
        RuleOutcome::from_notifications(notifications).with_summary(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use graphwatch_core::{
        Allocation, DeploymentHealth, FatalError, NetworkTotals, RuleConfig, Snapshot,
    };
    use std::collections::HashMap;

    fn alloc(subgraph: &str, deployment: &str) -> Allocation {
        Allocation {
            id: format!("0x-{subgraph}"),
            subgraph_name: subgraph.to_string(),
            subgraph_deployment: deployment.to_string(),
            allocated_tokens: "1000000000000000000".to_string(),
            signalled_tokens: "1000000000000000000".to_string(),
            created_at_epoch: 1,
            created_at: Utc::now(),
        }
    }

    fn failed(deployment: &str, fatal: Option<FatalError>, synced: bool) -> DeploymentHealth {
        DeploymentHealth {
            deployment: deployment.to_string(),
            health: HealthStatus::Failed,
            synced,
            fatal_error: fatal,
            latest_block: None,
            chain_head_block: None,
        }
    }

    fn snapshot(health: Option<HashMap<String, DeploymentHealth>>) -> Snapshot {
        Snapshot {
            allocations: vec![alloc("uniswap", "Qmdet"), alloc("aave", "Qmstale")],
            network: NetworkTotals::default(),
            account: None,
            health,
            fetched_at: Utc::now(),
        }
    }

    fn health_map() -> HashMap<String, DeploymentHealth> {
        let mut map = HashMap::new();
        map.insert(
            "Qmdet".to_string(),
            failed(
                "Qmdet",
                Some(FatalError {
                    message: "bad handler".to_string(),
                    deterministic: true,
                    block_number: Some(500),
                }),
                false,
            ),
        );
        map.insert("Qmstale".to_string(), failed("Qmstale", None, true));
        map
    }

    #[test]
    fn variants_pick_only_their_category() {
        let rule = RuleConfig::new("failed", "deployment-failed-deterministic");
        let snapshot = snapshot(Some(health_map()));
        let ctx = RuleContext {
            rule: &rule,
            snapshot: &snapshot,
            previous: None,
        };

        let det = DeploymentFailure::new(FailureCategory::Deterministic).evaluate(&ctx);
        assert_eq!(det.notifications.len(), 1);
        assert_eq!(det.notifications[0].severity, Severity::Critical);
        assert_eq!(det.notifications[0].metadata["category"], "deterministic");

        let stale = DeploymentFailure::new(FailureCategory::Stale).evaluate(&ctx);
        assert_eq!(stale.notifications.len(), 1);
        assert_eq!(stale.notifications[0].severity, Severity::Warning);
        assert_eq!(
            stale.notifications[0].metadata["subgraphs"][0]["ipfsHash"],
            "Qmstale"
        );

        let nondet = DeploymentFailure::new(FailureCategory::Nondeterministic).evaluate(&ctx);
        assert!(!nondet.triggered);
    }

    #[test]
    fn shared_deployment_yields_one_finding() {
        let rule = RuleConfig::new("failed", "deployment-failed-stale");
        let mut snapshot = snapshot(Some(health_map()));
        // Second allocation on the already-failed deployment.
        snapshot.allocations.push(alloc("aave-backup", "Qmstale"));
        let outcome = DeploymentFailure::new(FailureCategory::Stale).evaluate(&RuleContext {
            rule: &rule,
            snapshot: &snapshot,
            previous: None,
        });
        assert_eq!(outcome.notifications.len(), 1);
    }

    #[test]
    fn absent_health_map_degrades_to_not_triggered() {
        let rule = RuleConfig::new("failed", "deployment-failed-stale");
        let snapshot = snapshot(None);
        let outcome = DeploymentFailure::new(FailureCategory::Stale).evaluate(&RuleContext {
            rule: &rule,
            snapshot: &snapshot,
            previous: None,
        });
        assert!(!outcome.triggered);
        assert!(outcome.notifications.is_empty());
    }
}
