//! Deployments holding a share of the indexer's allocation far beyond their
//! share of network signal.
//!
//! Allocation is summed per deployment before any threshold is applied, so
//! conditions act on deployment totals, not per-allocation amounts.

use crate::conditions;
use crate::format::{self, TableRow};
use crate::registry::RuleKind;
use crate::rules::allocation_entry;
use crate::{Rule, RuleContext, RuleOutcome};
use graphwatch_core::{parse_tokens, Allocation, Notification, Severity};
use serde_json::json;
use std::collections::BTreeMap;

const DEFAULT_MAX_RATIO: f64 = 2.0;

pub struct AllocationProportion;

struct DeploymentTotal<'a> {
    allocations: Vec<&'a Allocation>,
    allocated: f64,
    signalled: f64,
}

impl Rule for AllocationProportion {
    fn kind(&self) -> RuleKind {
        RuleKind::AllocationProportion
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> RuleOutcome {
        let max_ratio = conditions::number_or(&ctx.rule.conditions, "maxRatio", DEFAULT_MAX_RATIO);
        let min_allocated = conditions::number_or(&ctx.rule.conditions, "minAllocatedTokens", 0.0);

        let total_allocated =
            parse_tokens(&ctx.snapshot.network.total_tokens_allocated).unwrap_or(0.0);
        let total_signalled =
            parse_tokens(&ctx.snapshot.network.total_tokens_signalled).unwrap_or(0.0);
        // Zero network totals would divide by zero; report not-triggered.
        if total_allocated <= 0.0 || total_signalled <= 0.0 {
            return RuleOutcome::not_triggered()
                .with_summary("network totals unavailable or zero, skipped");
        }

        let mut per_deployment: BTreeMap<&str, DeploymentTotal<'_>> = BTreeMap::new();
        for alloc in &ctx.snapshot.allocations {
            let entry = per_deployment
                .entry(alloc.subgraph_deployment.as_str())
                .or_insert_with(|| DeploymentTotal {
                    allocations: Vec::new(),
                    allocated: 0.0,
                    signalled: parse_tokens(&alloc.signalled_tokens).unwrap_or(0.0),
                });
            entry.allocated += parse_tokens(&alloc.allocated_tokens).unwrap_or(0.0);
            entry.allocations.push(alloc);
        }

        let deployments = per_deployment.len();
        let mut filtered = 0usize;
        let mut notifications = Vec::new();
        for (deployment, total) in per_deployment {
            if total.allocated < min_allocated {
                filtered += 1;
                continue;
            }
            let alloc_share = total.allocated / total_allocated;
            let signal_share = total.signalled / total_signalled;
            if alloc_share <= max_ratio * signal_share {
                continue;
            }
            let first = total.allocations[0];
            let ratio = if signal_share > 0.0 {
                alloc_share / signal_share
            } else {
                f64::INFINITY
            };
            let table = format::render_table(
                ("Subgraph", "Allocated", "Ratio"),
                &[TableRow::new(
                    &first.subgraph_name,
                    format::tokens_display(total.allocated),
                    if ratio.is_finite() {
                        format!("{ratio:.1}x")
                    } else {
                        "no signal".to_string()
                    },
                )],
            );
            let notification = Notification::new(
                &ctx.rule.id,
                format!("Disproportionate allocation on {}", first.subgraph_name),
                format!(
                    "{} holds {:.1}% of allocation against {:.2}% of network signal\n{table}",
                    first.subgraph_name,
                    alloc_share * 100.0,
                    signal_share * 100.0
                ),
                Severity::Warning,
            )
            .with_metadata(json!({
                "subgraphName": first.subgraph_name,
                "ipfsHash": deployment,
                "allocatedTokens": format!("{:.0}", total.allocated),
                "allocationShare": alloc_share,
                "signalShare": signal_share,
                "allocations": total
                    .allocations
                    .iter()
                    .map(|a| allocation_entry(a))
                    .collect::<Vec<_>>(),
            }));
            notifications.push(notification);
        }

        let summary = format!(
            "{deployments} deployments summed, {filtered} below allocation floor, {} disproportionate",
            notifications.len()
        );
        RuleOutcome::from_notifications(notifications).with_summary(summary)
    }
}
