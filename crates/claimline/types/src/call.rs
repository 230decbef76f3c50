//! Ledger write calls and commit plans.
//!
//! The engine never hands the wallet loosely-typed arguments: every write is one
//! variant of [`LedgerCall`] with its own argument struct and attached value.

use crate::descriptor::{NodeDescriptor, NodeRole};
use crate::ids::Identifier;
use crate::Amount;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateNodesArgs {
    pub descriptors: Vec<NodeDescriptor>,
    /// Total payable with the call.
    pub value: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateEdgeArgs {
    pub subject_id: Identifier,
    pub predicate_id: Identifier,
    pub object_id: Identifier,
    /// Initial deposit placed on the new edge.
    pub deposit: Amount,
    /// Creation cost plus deposit cost.
    pub value: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositArgs {
    pub edge_id: Identifier,
    pub amount: Amount,
    /// Deposit plus deposit fees.
    pub value: Amount,
}

/// A single ledger write, ready for signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum LedgerCall {
    CreateNodes(CreateNodesArgs),
    CreateEdge(CreateEdgeArgs),
    Deposit(DepositArgs),
}

impl LedgerCall {
    /// Target function name on the ledger.
    pub fn function(&self) -> &'static str {
        match self {
            Self::CreateNodes(_) => "create_nodes",
            Self::CreateEdge(_) => "create_edge_with_deposit",
            Self::Deposit(_) => "deposit",
        }
    }

    pub fn value(&self) -> &Amount {
        match self {
            Self::CreateNodes(args) => &args.value,
            Self::CreateEdge(args) => &args.value,
            Self::Deposit(args) => &args.value,
        }
    }

    /// Whether this call creates ledger entities (as opposed to only depositing).
    pub fn is_creation(&self) -> bool {
        matches!(self, Self::CreateNodes(_) | Self::CreateEdge(_))
    }
}

/// Node that verification found missing on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedNode {
    pub role: NodeRole,
    pub node_id: Identifier,
    pub descriptor: NodeDescriptor,
}

/// What the commit must do with the edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum EdgeAction {
    /// Edge absent: create it with an initial deposit.
    Create { deposit: Amount },
    /// Edge present with matching fields: deposit only.
    Deposit { edge_id: Identifier, amount: Amount },
}

/// Cost of a plan as quoted by the ledger's fee views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostQuote {
    pub node_creation: Amount,
    pub edge: Amount,
    pub total: Amount,
    pub quoted_at: DateTime<Utc>,
}

impl CostQuote {
    pub fn new(node_creation: Amount, edge: Amount, quoted_at: DateTime<Utc>) -> Self {
        let total = &node_creation + &edge;
        Self {
            node_creation,
            edge,
            total,
            quoted_at,
        }
    }
}

/// Minimal set of writes a claim needs, plus its last quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitPlan {
    pub missing_nodes: Vec<PlannedNode>,
    pub edge: EdgeAction,
    pub cost: CostQuote,
}

impl CommitPlan {
    pub fn creates_edge(&self) -> bool {
        matches!(self.edge, EdgeAction::Create { .. })
    }

    /// Number of writes this plan submits.
    pub fn write_count(&self, batch_nodes: bool) -> usize {
        let node_writes = match (self.missing_nodes.len(), batch_nodes) {
            (0, _) => 0,
            (_, true) => 1,
            (n, false) => n,
        };
        node_writes + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> Identifier {
        Identifier::from_bytes([byte; 32])
    }

    #[test]
    fn call_serializes_with_tag() {
        let call = LedgerCall::Deposit(DepositArgs {
            edge_id: id(7),
            amount: Amount::from(10u64),
            value: Amount::from(12u64),
        });
        let json = serde_json::to_value(&call).unwrap();
        assert_eq!(json["call"], "deposit");
        assert_eq!(json["value"], "12");
        assert_eq!(call.function(), "deposit");
        assert!(!call.is_creation());
    }

    #[test]
    fn plan_write_count_respects_batching() {
        let plan = CommitPlan {
            missing_nodes: vec![
                PlannedNode {
                    role: NodeRole::Subject,
                    node_id: id(1),
                    descriptor: NodeDescriptor::new("a"),
                },
                PlannedNode {
                    role: NodeRole::Object,
                    node_id: id(2),
                    descriptor: NodeDescriptor::new("b"),
                },
            ],
            edge: EdgeAction::Create {
                deposit: Amount::from(5u64),
            },
            cost: CostQuote::new(Amount::from(4u64), Amount::from(6u64), Utc::now()),
        };
        assert_eq!(plan.write_count(true), 2);
        assert_eq!(plan.write_count(false), 3);
        assert_eq!(plan.cost.total, Amount::from(10u64));
        assert!(plan.creates_edge());
    }
}
