//! Target key derivation.
//!
//! An incident is deduplicated against a deterministic key: the allocation id,
//! the subgraph+deployment pair, or a rule-wide key when the rule groups its
//! findings. At most one open or acknowledged incident exists per
//! (rule, target key) pair.

pub fn allocation_key(allocation_id: &str) -> String {
    format!("alloc:{allocation_id}")
}

pub fn deployment_key(subgraph_name: &str, deployment: &str) -> String {
    format!("deploy:{subgraph_name}:{deployment}")
}

/// Rule-scoped key used when `groupIncidents` is set: all of a rule's findings
/// in one cycle collapse into a single incident.
pub fn rule_group_key(rule_id: &str) -> String {
    format!("rule:{rule_id}")
}

/// Derive the target key for a notification from its metadata.
///
/// Falls back to the rule-group key when the metadata carries no recognizable
/// entity identity, so a rule that emits bare notifications still deduplicates.
pub fn target_key_for(rule_id: &str, metadata: &serde_json::Value) -> String {
    if let Some(id) = metadata.get("allocationId").and_then(|v| v.as_str()) {
        return allocation_key(id);
    }
    let subgraph = metadata.get("subgraphName").and_then(|v| v.as_str());
    let deployment = metadata.get("ipfsHash").and_then(|v| v.as_str());
    if let (Some(subgraph), Some(deployment)) = (subgraph, deployment) {
        return deployment_key(subgraph, deployment);
    }
    rule_group_key(rule_id)
}
