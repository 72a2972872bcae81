//! Rule type registry.
//!
//! A rule config carries a string type tag; the registry maps tags to detector
//! constructors. Adding a rule type means one variant and one constructor arm
//! here, never a change to the engine.

use crate::rules::{
    behind_chainhead::BehindChainhead, duration::AllocationDuration, failure::DeploymentFailure,
    negative_stake::NegativeAvailableStake, proportion::AllocationProportion,
    redeployment::SubgraphRedeployment, signal_drop::SignalDrop,
};
use crate::Rule;
use graphwatch_core::FailureCategory;
use std::fmt;

/// Closed set of rule types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleKind {
    AllocationDuration,
    SignalDrop,
    AllocationProportion,
    SubgraphRedeployment,
    DeploymentFailedStale,
    DeploymentFailedDeterministic,
    DeploymentFailedNondeterministic,
    BehindChainhead,
    NegativeAvailableStake,
}

impl RuleKind {
    pub const ALL: [RuleKind; 9] = [
        Self::AllocationDuration,
        Self::SignalDrop,
        Self::AllocationProportion,
        Self::SubgraphRedeployment,
        Self::DeploymentFailedStale,
        Self::DeploymentFailedDeterministic,
        Self::DeploymentFailedNondeterministic,
        Self::BehindChainhead,
        Self::NegativeAvailableStake,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            Self::AllocationDuration => "allocation-duration",
            Self::SignalDrop => "signal-drop",
            Self::AllocationProportion => "allocation-proportion",
            Self::SubgraphRedeployment => "subgraph-redeployment",
            Self::DeploymentFailedStale => "deployment-failed-stale",
            Self::DeploymentFailedDeterministic => "deployment-failed-deterministic",
            Self::DeploymentFailedNondeterministic => "deployment-failed-nondeterministic",
            Self::BehindChainhead => "behind-chainhead",
            Self::NegativeAvailableStake => "negative-available-stake",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    /// Human label used as a digest section header
    pub fn label(&self) -> &'static str {
        match self {
            Self::AllocationDuration => "Long-running allocations",
            Self::SignalDrop => "Signal dropped to zero",
            Self::AllocationProportion => "Disproportionate allocations",
            Self::SubgraphRedeployment => "Subgraph redeployments",
            Self::DeploymentFailedStale => "Stale failed deployments",
            Self::DeploymentFailedDeterministic => "Deterministic failures",
            Self::DeploymentFailedNondeterministic => "Nondeterministic failures",
            Self::BehindChainhead => "Deployments behind chain head",
            Self::NegativeAvailableStake => "Negative available stake",
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Construct the detector for a type tag; `None` for unknown tags, which the
/// engine skips with a warning rather than crashing the cycle.
pub fn build_rule(tag: &str) -> Option<Box<dyn Rule>> {
    let kind = RuleKind::from_tag(tag)?;
    let rule: Box<dyn Rule> = match kind {
        RuleKind::AllocationDuration => Box::new(AllocationDuration),
        RuleKind::SignalDrop => Box::new(SignalDrop),
        RuleKind::AllocationProportion => Box::new(AllocationProportion),
        RuleKind::SubgraphRedeployment => Box::new(SubgraphRedeployment),
        RuleKind::DeploymentFailedStale => {
            Box::new(DeploymentFailure::new(FailureCategory::Stale))
        }
        RuleKind::DeploymentFailedDeterministic => {
            Box::new(DeploymentFailure::new(FailureCategory::Deterministic))
        }
        RuleKind::DeploymentFailedNondeterministic => {
            Box::new(DeploymentFailure::new(FailureCategory::Nondeterministic))
        }
        RuleKind::BehindChainhead => Box::new(BehindChainhead),
        RuleKind::NegativeAvailableStake => Box::new(NegativeAvailableStake),
    };
    Some(rule)
}
