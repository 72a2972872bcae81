//! Allocations whose deployment signal dropped to zero.
//!
//! Zero signal means zero query-fee share and zero indexing rewards on that
//! deployment; the allocation is dead weight until it is closed.

use crate::conditions;
use crate::registry::RuleKind;
use crate::rules::allocation_entry;
use crate::{Rule, RuleContext, RuleOutcome};
use graphwatch_core::{parse_tokens, Notification, Severity};
use serde_json::json;

pub struct SignalDrop;

impl Rule for SignalDrop {
    fn kind(&self) -> RuleKind {
        RuleKind::SignalDrop
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> RuleOutcome {
        let min_allocated = conditions::number_or(&ctx.rule.conditions, "minAllocatedTokens", 0.0);

        let mut notifications = Vec::new();
        let mut filtered = 0usize;
        for alloc in &ctx.snapshot.allocations {
            let signalled = match parse_tokens(&alloc.signalled_tokens) {
                Some(v) => v,
                None => continue,
            };
            if signalled != 0.0 {
                continue;
            }
            let allocated = parse_tokens(&alloc.allocated_tokens).unwrap_or(0.0);
            if allocated < min_allocated {
                filtered += 1;
                continue;
            }
            let notification = Notification::new(
                &ctx.rule.id,
                format!("Signal dropped to zero on {}", alloc.subgraph_name),
                format!(
                    "Allocation {} on {} has zero signalled tokens",
                    alloc.id, alloc.subgraph_name
                ),
                Severity::Warning,
            )
            .with_metadata(json!({
                "allocationId": alloc.id,
                "subgraphName": alloc.subgraph_name,
                "ipfsHash": alloc.subgraph_deployment,
                "signalledTokens": alloc.signalled_tokens,
                "allocations": [allocation_entry(alloc)],
            }));
            notifications.push(notification);
        }

        let summary = format!(
            "{} allocations scanned, {} below allocation floor, {} with zero signal",
            ctx.snapshot.allocations.len(),
            filtered,
            notifications.len()
        );
        RuleOutcome::from_notifications(notifications).with_summary(summary)
    }
}
