//! Deployments lagging the chain head by more than the configured block count.

use crate::conditions;
use crate::registry::RuleKind;
use crate::{Rule, RuleContext, RuleOutcome};
use graphwatch_core::{HealthStatus, Notification, Severity};
use serde_json::json;

const DEFAULT_MAX_BLOCKS_BEHIND: f64 = 1000.0;

pub struct BehindChainhead;

impl Rule for BehindChainhead {
    fn kind(&self) -> RuleKind {
        RuleKind::BehindChainhead
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> RuleOutcome {
        let max_behind = conditions::number_or(
            &ctx.rule.conditions,
            "maxBlocksBehind",
            DEFAULT_MAX_BLOCKS_BEHIND,
        ) as u64;

        let health_map = match &ctx.snapshot.health {
            Some(map) => map,
            None => {
                return RuleOutcome::not_triggered().with_summary("no health data, skipped")
            }
        };

        let mut notifications = Vec::new();
        // One finding per deployment, however many allocations point at it.
        let mut seen = std::collections::HashSet::new();
        for alloc in &ctx.snapshot.allocations {
            if !seen.insert(alloc.subgraph_deployment.as_str()) {
                continue;
            }
            let health = match health_map.get(&alloc.subgraph_deployment) {
                Some(health) => health,
                None => continue,
            };
            // Failed deployments are the failure rules' business.
            if health.health == HealthStatus::Failed {
                continue;
            }
            let (latest, head) = match (health.latest_block, health.chain_head_block) {
                (Some(latest), Some(head)) => (latest, head),
                _ => continue,
            };
            let behind = head.saturating_sub(latest);
            if behind <= max_behind {
                continue;
            }
            let notification = Notification::new(
                &ctx.rule.id,
                format!("{} is {behind} blocks behind", alloc.subgraph_name),
                format!(
                    "{} is at block {latest}, chain head is {head} ({behind} behind, limit {max_behind})",
                    alloc.subgraph_name
                ),
                Severity::Warning,
            )
            .with_metadata(json!({
                "subgraphName": alloc.subgraph_name,
                "ipfsHash": alloc.subgraph_deployment,
                "blocksBehind": behind,
                "latestBlock": latest,
                "chainHeadBlock": head,
                "subgraphs": [{
                    "name": alloc.subgraph_name,
                    "ipfsHash": alloc.subgraph_deployment,
                    "blocksBehind": behind,
                }],
            }));
            notifications.push(notification);
        }

        let summary = format!(
            "{} deployments with health data, {} more than {max_behind} blocks behind",
            health_map.len(),
            notifications.len()
        );
        RuleOutcome::from_notifications(notifications).with_summary(summary)
    }
}
