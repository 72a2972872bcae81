//! Allocations open longer than the configured maximum.
//!
//! Long-lived allocations stop earning indexing rewards past the network's
//! maximum allocation lifetime, so an open allocation past the threshold is
//! money left on the table.

use crate::conditions;
use crate::format::{self, TableRow};
use crate::registry::RuleKind;
use crate::rules::allocation_entry;
use crate::{Rule, RuleContext, RuleOutcome};
use chrono::Utc;
use graphwatch_core::{parse_tokens, Notification, Severity};
use serde_json::json;

const DEFAULT_MAX_DURATION_DAYS: f64 = 28.0;

pub struct AllocationDuration;

impl Rule for AllocationDuration {
    fn kind(&self) -> RuleKind {
        RuleKind::AllocationDuration
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> RuleOutcome {
        let max_days = conditions::number_or(
            &ctx.rule.conditions,
            "maxDurationDays",
            DEFAULT_MAX_DURATION_DAYS,
        );
        let now = Utc::now();

        let mut notifications = Vec::new();
        for alloc in &ctx.snapshot.allocations {
            let age_days =
                now.signed_duration_since(alloc.created_at).num_hours() as f64 / 24.0;
            if age_days <= max_days {
                continue;
            }
            let allocated = parse_tokens(&alloc.allocated_tokens).unwrap_or(0.0);
            let table = format::render_table(
                ("Subgraph", "Allocated", "Age"),
                &[TableRow::new(
                    &alloc.subgraph_name,
                    format::tokens_display(allocated),
                    format!("{age_days:.0}d"),
                )],
            );
            let notification = Notification::new(
                &ctx.rule.id,
                format!("Allocation open for {age_days:.0} days"),
                format!(
                    "Allocation {} on {} exceeds the {max_days:.0} day limit\n{table}",
                    alloc.id, alloc.subgraph_name
                ),
                Severity::Warning,
            )
            .with_metadata(json!({
                "allocationId": alloc.id,
                "subgraphName": alloc.subgraph_name,
                "ipfsHash": alloc.subgraph_deployment,
                "durationDays": age_days.floor(),
                "allocations": [allocation_entry(alloc)],
            }));
            notifications.push(notification);
        }

        let summary = format!(
            "{} allocations scanned, {} older than {max_days:.0} days",
            ctx.snapshot.allocations.len(),
            notifications.len()
        );
        RuleOutcome::from_notifications(notifications).with_summary(summary)
    }
}
