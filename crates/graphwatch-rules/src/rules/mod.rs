//! Detector implementations.

pub mod behind_chainhead;
pub mod duration;
pub mod failure;
pub mod negative_stake;
pub mod proportion;
pub mod redeployment;
pub mod signal_drop;

use graphwatch_core::Allocation;
use serde_json::json;

/// Per-allocation entry for `metadata.allocations`, a wire shape parsed by
/// remediation tooling.
pub(crate) fn allocation_entry(alloc: &Allocation) -> serde_json::Value {
    json!({
        "id": alloc.id,
        "subgraphName": alloc.subgraph_name,
        "ipfsHash": alloc.subgraph_deployment,
        "allocatedTokens": alloc.allocated_tokens,
        "createdAtEpoch": alloc.created_at_epoch,
    })
}
