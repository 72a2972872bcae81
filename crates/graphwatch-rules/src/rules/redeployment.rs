//! Subgraphs whose deployment hash changed since the previous cycle.
//!
//! A redeployment means the open allocation is pointed at a superseded
//! deployment and should be moved. Needs the previous cycle's slice; with no
//! prior state (first cycle after startup) it reports not-triggered.

use crate::registry::RuleKind;
use crate::{Rule, RuleContext, RuleOutcome};
use graphwatch_core::{Notification, Severity};
use serde_json::json;

pub struct SubgraphRedeployment;

impl Rule for SubgraphRedeployment {
    fn kind(&self) -> RuleKind {
        RuleKind::SubgraphRedeployment
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> RuleOutcome {
        let previous = match ctx.previous {
            Some(previous) => previous,
            None => {
                return RuleOutcome::not_triggered()
                    .with_summary("no previous state yet, skipped")
            }
        };

        let mut notifications = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for alloc in &ctx.snapshot.allocations {
            if !seen.insert(alloc.subgraph_name.as_str()) {
                continue;
            }
            let prior = match previous.deployments.get(&alloc.subgraph_name) {
                Some(prior) => prior,
                None => continue, // new subgraph, nothing to diff against
            };
            if prior == &alloc.subgraph_deployment {
                continue;
            }
            let notification = Notification::new(
                &ctx.rule.id,
                format!("{} was redeployed", alloc.subgraph_name),
                format!(
                    "{} moved from {} to {}; the open allocation targets the old deployment",
                    alloc.subgraph_name, prior, alloc.subgraph_deployment
                ),
                Severity::Info,
            )
            .with_metadata(json!({
                "subgraphName": alloc.subgraph_name,
                "ipfsHash": alloc.subgraph_deployment,
                "previousIpfsHash": prior,
                "subgraphs": [{
                    "name": alloc.subgraph_name,
                    "ipfsHash": alloc.subgraph_deployment,
                    "previousIpfsHash": prior,
                }],
            }));
            notifications.push(notification);
        }

        let summary = format!(
            "{} subgraphs diffed, {} redeployed",
            seen.len(),
            notifications.len()
        );
        RuleOutcome::from_notifications(notifications).with_summary(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use graphwatch_core::{Allocation, NetworkTotals, PreviousState, RuleConfig, Snapshot};

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

    fn snapshot(allocations: Vec<Allocation>) -> Snapshot {
        Snapshot {
            allocations,
            network: NetworkTotals::default(),
            account: None,
            health: None,
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn hash_change_fires_info_notification() {
        let rule = RuleConfig::new("redeploy", "subgraph-redeployment");
        let snapshot = snapshot(vec![alloc("uniswap", "Qmnew")]);
        let previous = PreviousState {
            deployments: [("uniswap".to_string(), "Qmold".to_string())].into(),
        };
        let outcome = SubgraphRedeployment.evaluate(&RuleContext {
            rule: &rule,
            snapshot: &snapshot,
            previous: Some(&previous),
        });
        assert!(outcome.triggered);
        let n = &outcome.notifications[0];
        assert_eq!(n.severity, Severity::Info);
        assert_eq!(n.metadata["previousIpfsHash"], "Qmold");
        assert_eq!(n.metadata["ipfsHash"], "Qmnew");
    }

    #[test]
    fn no_previous_state_reports_not_triggered() {
        let rule = RuleConfig::new("redeploy", "subgraph-redeployment");
        let snapshot = snapshot(vec![alloc("uniswap", "Qmnew")]);
        let outcome = SubgraphRedeployment.evaluate(&RuleContext {
            rule: &rule,
            snapshot: &snapshot,
            previous: None,
        });
        assert!(!outcome.triggered);
    }

    #[test]
    fn unchanged_and_new_subgraphs_stay_quiet() {
        let rule = RuleConfig::new("redeploy", "subgraph-redeployment");
        let snapshot = snapshot(vec![alloc("uniswap", "Qmsame"), alloc("aave", "Qmfresh")]);
        let previous = PreviousState {
            deployments: [("uniswap".to_string(), "Qmsame".to_string())].into(),
        };
        let outcome = SubgraphRedeployment.evaluate(&RuleContext {
            rule: &rule,
            snapshot: &snapshot,
            previous: Some(&previous),
        });
        assert!(!outcome.triggered);
    }
}
