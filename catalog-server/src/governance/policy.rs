//! The approval policy engine.
//!
//! Policies are YAML rules; the first selector that matches the target
//! asset contributes its gates, and every gate matching the attempted
//! action must be satisfied before the action executes. The policy
//! document hot-reloads on SIGHUP.

use serde::{Deserialize, Serialize};

/// Matches assets by risk level, kind and plugin. Empty lists match all.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicySelector {
    #[serde(default)]
    pub risk_levels: Vec<String>,
    #[serde(default)]
    pub kinds: Vec<String>,
    #[serde(default)]
    pub plugins: Vec<String>,
}

impl PolicySelector {
    pub fn matches(&self, plugin: &str, kind: &str, risk: Option<&str>) -> bool {
        let risk_ok = self.risk_levels.is_empty()
            || risk.map(|r| self.risk_levels.iter().any(|x| x == r)).unwrap_or(false);
        let kind_ok = self.kinds.is_empty() || self.kinds.iter().any(|x| x == kind);
        let plugin_ok = self.plugins.is_empty() || self.plugins.iter().any(|x| x == plugin);
        risk_ok && kind_ok && plugin_ok
    }
}

/// One gate: the action it guards and how many approvals it takes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalGate {
    pub action: String,
    #[serde(rename = "approvalsRequired", alias = "approvals_required")]
    pub approvals_required: u32,
    #[serde(
        rename = "allowedApprovers",
        alias = "allowed_approvers",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub allowed_approvers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalPolicy {
    pub id: String,
    #[serde(default)]
    pub selector: PolicySelector,
    #[serde(default)]
    pub gates: Vec<ApprovalGate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(default)]
    pub policies: Vec<ApprovalPolicy>,
}

impl PolicyDocument {
    pub fn parse(raw: &str) -> Result<PolicyDocument, serde_yaml::Error> {
        serde_yaml::from_str(raw)
    }

    pub fn load(path: &str) -> anyhow::Result<PolicyDocument> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading policies '{path}': {e}"))?;
        Ok(PolicyDocument::parse(&raw)?)
    }
}

/// The gates the attempted action must clear; empty means ungated.
#[derive(Debug, Clone, Default)]
pub struct EffectiveGate {
    pub policy_id: Option<String>,
    pub gates: Vec<ApprovalGate>,
}

impl EffectiveGate {
    pub fn is_gated(&self) -> bool {
        !self.gates.is_empty()
    }

    /// Largest approval count across the gates, used for display.
    pub fn approvals_required(&self) -> u32 {
        self.gates.iter().map(|g| g.approvals_required).max().unwrap_or(0)
    }

    /// Whether the collected approvals satisfy every gate. `approvers`
    /// holds the principals that approved (denials are handled upstream).
    pub fn satisfied(&self, approvers: &[String]) -> bool {
        self.gates.iter().all(|gate| {
            let count = approvers
                .iter()
                .filter(|a| {
                    gate.allowed_approvers.is_empty() || gate.allowed_approvers.contains(a)
                })
                .count() as u32;
            count >= gate.approvals_required
        })
    }

    /// An approver is eligible when any gate accepts them.
    pub fn approver_allowed(&self, approver: &str) -> bool {
        self.gates.iter().any(|gate| {
            gate.allowed_approvers.is_empty()
                || gate.allowed_approvers.iter().any(|a| a == approver)
        })
    }
}

/// Finds the gates for an attempted action: first matching selector wins.
pub fn gates_for(
    policies: &[ApprovalPolicy],
    plugin: &str,
    kind: &str,
    risk: Option<&str>,
    action: &str,
) -> EffectiveGate {
    for policy in policies {
        if !policy.selector.matches(plugin, kind, risk) {
            continue;
        }
        let gates: Vec<ApprovalGate> = policy
            .gates
            .iter()
            .filter(|g| g.action == action)
            .cloned()
            .collect();
        return EffectiveGate {
            policy_id: Some(policy.id.clone()),
            gates,
        };
    }
    EffectiveGate::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document() -> PolicyDocument {
        PolicyDocument::parse(
            r#"
policies:
  - id: high-risk
    selector:
      risk_levels: [high]
    gates:
      - action: lifecycle.setState
        approvalsRequired: 2
  - id: mcp-promotions
    selector:
      plugins: [mcp]
    gates:
      - action: promotion.bind
        approvalsRequired: 1
        allowedApprovers: [alice, bob]
"#,
        )
        .unwrap()
    }

    #[test]
    fn first_matching_selector_contributes_gates() {
        let doc = document();
        let gate = gates_for(&doc.policies, "mcp", "McpServer", Some("high"), "lifecycle.setState");
        assert!(gate.is_gated());
        assert_eq!(gate.approvals_required(), 2);

        // High-risk policy matches first, so its (empty) gate set for
        // promotion.bind wins over the mcp policy.
        let gate = gates_for(&doc.policies, "mcp", "McpServer", Some("high"), "promotion.bind");
        assert!(!gate.is_gated());

        let gate = gates_for(&doc.policies, "mcp", "McpServer", None, "promotion.bind");
        assert!(gate.is_gated());
        assert!(gate.approver_allowed("alice"));
        assert!(!gate.approver_allowed("mallory"));
    }

    #[test]
    fn satisfaction_counts_only_allowed_approvers() {
        let doc = document();
        let gate = gates_for(&doc.policies, "mcp", "McpServer", None, "promotion.bind");
        assert!(!gate.satisfied(&["mallory".to_string()]));
        assert!(gate.satisfied(&["alice".to_string()]));

        let gate = gates_for(&doc.policies, "models", "CatalogModel", Some("high"), "lifecycle.setState");
        assert!(!gate.satisfied(&["a".to_string()]));
        assert!(gate.satisfied(&["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn no_match_means_ungated() {
        let doc = document();
        let gate = gates_for(&doc.policies, "models", "CatalogModel", Some("low"), "lifecycle.setState");
        assert!(!gate.is_gated());
    }
}
