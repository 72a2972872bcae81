//! Indexer account with negative available stake.
//!
//! Happens after slashing or over-allocation; the indexer cannot open new
//! allocations until it unwinds. One finding at most, keyed rule-wide.

use crate::registry::RuleKind;
use crate::{Rule, RuleContext, RuleOutcome};
use graphwatch_core::{parse_tokens, Notification, Severity};
use serde_json::json;

pub struct NegativeAvailableStake;

impl Rule for NegativeAvailableStake {
    fn kind(&self) -> RuleKind {
        RuleKind::NegativeAvailableStake
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> RuleOutcome {
        let account = match &ctx.snapshot.account {
            Some(account) => account,
            None => {
                return RuleOutcome::not_triggered().with_summary("no account data, skipped")
            }
        };
        let available = match parse_tokens(&account.available_stake) {
            Some(available) => available,
            None => {
                return RuleOutcome::not_triggered()
                    .with_summary("unparseable available stake, skipped")
            }
        };
        if available >= 0.0 {
            return RuleOutcome::not_triggered()
                .with_summary(format!("available stake {available:.0} GRT, healthy"));
        }

        let notification = Notification::new(
            &ctx.rule.id,
            "Available stake is negative",
            format!(
                "Indexer {} has {available:.0} GRT available stake; close allocations to recover",
                account.id
            ),
            Severity::Critical,
        )
        .with_metadata(json!({
            "indexer": account.id,
            "availableStake": account.available_stake,
            "stakedTokens": account.staked_tokens,
            "allocatedTokens": account.allocated_tokens,
        }));

        RuleOutcome::from_notifications(vec![notification])
            .with_summary(format!("available stake {available:.0} GRT, negative"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use graphwatch_core::{IndexerAccount, NetworkTotals, RuleConfig, Snapshot};

    fn snapshot(available: &str) -> Snapshot {
        Snapshot {
            allocations: Vec::new(),
            network: NetworkTotals::default(),
            account: Some(IndexerAccount {
                id: "0xindexer".to_string(),
                staked_tokens: "100000000000000000000".to_string(),
                allocated_tokens: "150000000000000000000".to_string(),
                available_stake: available.to_string(),
            }),
            health: None,
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn negative_stake_is_critical() {
        let rule = RuleConfig::new("stake", "negative-available-stake");
        let outcome = NegativeAvailableStake.evaluate(&RuleContext {
            rule: &rule,
            snapshot: &snapshot("-50000000000000000000"),
            previous: None,
        });
        assert!(outcome.triggered);
        assert_eq!(outcome.notifications[0].severity, Severity::Critical);
        assert_eq!(
            outcome.notifications[0].metadata["availableStake"],
            "-50000000000000000000"
        );
    }

    #[test]
    fn positive_stake_and_missing_account_stay_quiet() {
        let rule = RuleConfig::new("stake", "negative-available-stake");
        let positive = NegativeAvailableStake.evaluate(&RuleContext {
            rule: &rule,
            snapshot: &snapshot("50000000000000000000"),
            previous: None,
        });
        assert!(!positive.triggered);

        let mut no_account = snapshot("0");
        no_account.account = None;
        let outcome = NegativeAvailableStake.evaluate(&RuleContext {
            rule: &rule,
            snapshot: &no_account,
            previous: None,
        });
        assert!(!outcome.triggered);
    }
}
