//! The follower/candidate/leader state machine.

use std::collections::HashSet;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ElectionError;

/// A node's current role in the election protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Follower,
    Candidate,
    Leader,
}

/// The election state owned by a single node.
///
/// No log replication lives here — the WAL replicates independently of
/// this protocol; this tracks only role, term, and vote bookkeeping.
#[derive(Debug, Clone)]
pub struct ElectionState {
    node_id: String,
    role: NodeRole,
    term: u64,
    voted_for: Option<String>,
    leader_id: Option<String>,
    votes: HashSet<String>,
    quorum_size: usize,
    last_activity: Instant,
}

impl ElectionState {
    /// Start as a follower at term 0, as every node does.
    pub fn new(node_id: impl Into<String>, quorum_size: usize) -> Self {
        Self {
            node_id: node_id.into(),
            role: NodeRole::Follower,
            term: 0,
            voted_for: None,
            leader_id: None,
            votes: HashSet::new(),
            quorum_size,
            last_activity: Instant::now(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn term(&self) -> u64 {
        self.term
    }

    pub fn voted_for(&self) -> Option<&str> {
        self.voted_for.as_deref()
    }

    pub fn leader_id(&self) -> Option<&str> {
        self.leader_id.as_deref()
    }

    pub fn is_leader(&self) -> bool {
        self.role == NodeRole::Leader
    }

    /// Time elapsed since the last heartbeat, vote grant, or election
    /// start — what the timeout worker compares against the randomized
    /// election timeout.
    pub fn elapsed_since_activity(&self) -> std::time::Duration {
        self.last_activity.elapsed()
    }

    fn note_activity(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Any role observing a strictly higher term reverts to follower at
    /// that term and clears its vote. Returns true if a transition occurred.
    pub fn observe_term(&mut self, term: u64) -> bool {
        if term > self.term {
            debug!(from = self.term, to = term, node = %self.node_id, "observed higher term");
            self.term = term;
            self.role = NodeRole::Follower;
            self.voted_for = None;
            self.leader_id = None;
            self.votes.clear();
            true
        } else {
            false
        }
    }

    /// Follower → candidate on election-timer expiry: increment term, vote
    /// for self, and reset the timer.
    pub fn start_election(&mut self) -> u64 {
        self.term += 1;
        self.role = NodeRole::Candidate;
        self.voted_for = Some(self.node_id.clone());
        self.leader_id = None;
        self.votes.clear();
        self.votes.insert(self.node_id.clone());
        self.note_activity();
        info!(term = self.term, node = %self.node_id, "started election");
        self.term
    }

    /// Grant a vote iff `candidate_term >= self.term` AND (we have not yet
    /// voted this term OR we already voted for this same candidate).
    /// Granting resets the election timer.
    pub fn try_grant_vote(
        &mut self,
        candidate_id: &str,
        candidate_term: u64,
    ) -> Result<bool, ElectionError> {
        if candidate_term < self.term {
            return Err(ElectionError::StaleTerm {
                message_term: candidate_term,
                current_term: self.term,
            });
        }
        if candidate_term > self.term {
            self.observe_term(candidate_term);
        }
        let grant = match &self.voted_for {
            None => true,
            Some(existing) if existing == candidate_id => true,
            Some(existing) => {
                return Err(ElectionError::AlreadyVoted {
                    voted_for: existing.clone(),
                    term: self.term,
                });
            }
        };
        if grant {
            self.voted_for = Some(candidate_id.to_string());
            self.note_activity();
        }
        Ok(grant)
    }

    /// Record a vote received while candidate; returns true the instant
    /// quorum is reached (idempotent past that point).
    pub fn register_vote(&mut self, voter_id: &str) -> Result<bool, ElectionError> {
        if self.role != NodeRole::Candidate {
            return Err(ElectionError::NotCandidate);
        }
        self.votes.insert(voter_id.to_string());
        Ok(self.votes.len() >= self.quorum_size)
    }

    /// Candidate → leader once quorum is reached.
    pub fn become_leader(&mut self) -> Result<(), ElectionError> {
        if self.role != NodeRole::Candidate {
            return Err(ElectionError::NotCandidate);
        }
        if self.votes.len() < self.quorum_size {
            return Err(ElectionError::QuorumNotAchieved);
        }
        self.role = NodeRole::Leader;
        self.leader_id = Some(self.node_id.clone());
        self.voted_for = Some(self.node_id.clone());
        self.note_activity();
        info!(term = self.term, node = %self.node_id, "became leader");
        Ok(())
    }

    /// Any role, on a heartbeat at an equal-or-higher term: become (or
    /// remain) follower of `leader_id`, reset the timer.
    pub fn on_heartbeat(&mut self, leader_id: &str, term: u64) -> Result<(), ElectionError> {
        if term < self.term {
            return Err(ElectionError::StaleTerm {
                message_term: term,
                current_term: self.term,
            });
        }
        self.observe_term(term);
        self.role = NodeRole::Follower;
        self.leader_id = Some(leader_id.to_string());
        self.note_activity();
        Ok(())
    }

    /// Operator override: atomically become leader, incrementing the term.
    /// Used by the failover supervisor.
    pub fn force_leadership(&mut self) {
        self.term += 1;
        self.role = NodeRole::Leader;
        self.leader_id = Some(self.node_id.clone());
        self.voted_for = Some(self.node_id.clone());
        self.votes.clear();
        self.note_activity();
        info!(term = self.term, node = %self.node_id, "forced leadership");
    }

    /// Operator override: leader → follower, preserving the term.
    pub fn step_down(&mut self) -> Result<(), ElectionError> {
        if self.role != NodeRole::Leader {
            return Err(ElectionError::InvalidState {
                reason: "step_down requires leader role".into(),
            });
        }
        self.role = NodeRole::Follower;
        self.leader_id = None;
        self.note_activity();
        info!(term = self.term, node = %self.node_id, "stepped down");
        Ok(())
    }
}
