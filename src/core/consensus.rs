//! Consensus tallying across the five deliberating agents.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::types::{AgentName, Vote, VoteChoice};

/// Tolerance for threshold comparison, so exact-share boundaries like 2/3
/// are not lost to floating point.
pub const THRESHOLD_EPSILON: f64 = 1e-9;

/// Tally of one consensus round, persisted as `consensus.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    /// Ballot per agent. Ordered map keeps serialized output stable.
    pub votes: BTreeMap<AgentName, VoteChoice>,
    pub approval_rate: f64,
    pub approved: bool,
    pub reason: String,
}

/// Tally ballots against `threshold`.
///
/// Every deliberating agent is counted: an agent missing from `ballots` is
/// treated as a reject. Approval holds when `rate + ε ≥ threshold`.
pub fn tally(ballots: &BTreeMap<AgentName, Vote>, threshold: f64) -> ConsensusResult {
    let mut votes = BTreeMap::new();
    for agent in AgentName::DELIBERATORS {
        let choice = ballots
            .get(&agent)
            .map(|ballot| ballot.vote)
            .unwrap_or(VoteChoice::Reject);
        votes.insert(agent, choice);
    }

    let total = votes.len();
    let approvals = votes
        .values()
        .filter(|choice| **choice == VoteChoice::Approve)
        .count();
    let approval_rate = approvals as f64 / total as f64;
    let approved = approval_rate + THRESHOLD_EPSILON >= threshold;

    let reason = format!(
        "{approvals}/{total} agents approved (threshold {threshold:.2}): {}",
        if approved { "approved" } else { "not approved" }
    );

    ConsensusResult {
        votes,
        approval_rate,
        approved,
        reason,
    }
}
