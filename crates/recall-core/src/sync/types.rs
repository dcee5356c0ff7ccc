//! Synchronization result types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::card::{CardId, CardState, ContainerId};
use crate::error::CoreError;

/// Cards are merged only with cards sharing both stage and state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey {
    pub stage: u8,
    pub state: CardState,
}

impl std::fmt::Display for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stage {} / {}", self.stage, self.state)
    }
}

/// Why a card was left out of grouping or write-back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The card's fields contradict the card invariants.
    InvariantViolation { message: String },
    /// Classified into a timed state without the matching timer field.
    MissingTimer { state: CardState },
    /// The stored row could not be decoded into a card.
    Unreadable { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedCard {
    pub card_id: CardId,
    #[serde(flatten)]
    pub reason: SkipReason,
}

/// What happened to one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GroupStatus {
    /// Fewer than two cards; nothing to merge.
    Singleton,
    /// Every card already sits on the earliest timer.
    AlreadyAligned { target: DateTime<Utc> },
    /// Timers were pulled onto the earliest one.
    Merged { target: DateTime<Utc>, changed: usize },
    /// Spread exceeds the tolerance window; left unchanged.
    Diverged,
    /// The store failed while writing; the group was rolled back.
    Failed { error: String },
}

/// Audit record for one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupOutcome {
    pub key: GroupKey,
    pub card_ids: Vec<CardId>,
    /// Spread of timer end times when the group was evaluated, in seconds.
    pub spread_secs: i64,
    pub status: GroupStatus,
}

/// Summary of one `synchronize_container` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub scope_id: ContainerId,
    /// Groups in which at least one card's timer changed.
    pub groups_merged: usize,
    /// Cards whose stored timer changed.
    pub cards_merged: usize,
    /// Non-mastered cards loaded from the scope, plus every card skipped as
    /// malformed or unreadable.
    pub total_cards_considered: usize,
    pub groups: Vec<GroupOutcome>,
    pub skipped: Vec<SkippedCard>,
    /// Cards dropped from a merge because they changed after the snapshot.
    pub conflicts: Vec<CardId>,
}

impl SyncResult {
    pub fn new(scope_id: impl Into<ContainerId>) -> Self {
        Self {
            scope_id: scope_id.into(),
            ..Self::default()
        }
    }

    pub fn failed_groups(&self) -> usize {
        self.groups
            .iter()
            .filter(|g| matches!(g.status, GroupStatus::Failed { .. }))
            .count()
    }

    /// Human-readable description of every decision, one line each.
    pub fn audit_trail(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .groups
            .iter()
            .map(|g| {
                let n = g.card_ids.len();
                match &g.status {
                    GroupStatus::Singleton => format!("{}: {n} card(s), nothing to merge", g.key),
                    GroupStatus::AlreadyAligned { target } => {
                        format!("{}: {n} cards already aligned at {}", g.key, target.to_rfc3339())
                    }
                    GroupStatus::Merged { target, changed } => format!(
                        "{}: merged {changed} of {n} cards to {} (spread {}s)",
                        g.key,
                        target.to_rfc3339(),
                        g.spread_secs
                    ),
                    GroupStatus::Diverged => format!(
                        "{}: spread {}s exceeds tolerance, {n} cards left unchanged",
                        g.key, g.spread_secs
                    ),
                    GroupStatus::Failed { error } => format!("{}: failed ({error})", g.key),
                }
            })
            .collect();
        lines.extend(self.skipped.iter().map(|s| match &s.reason {
            SkipReason::InvariantViolation { message } => {
                format!("skipped {}: {message}", s.card_id)
            }
            SkipReason::MissingTimer { state } => {
                format!("skipped {}: {state} without timer", s.card_id)
            }
            SkipReason::Unreadable { message } => {
                format!("skipped {}: unreadable row ({message})", s.card_id)
            }
        }));
        lines.extend(
            self.conflicts
                .iter()
                .map(|id| format!("conflict {id}: changed since snapshot, excluded")),
        );
        lines
    }
}

/// Outcome of one scope in a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScopeOutcome {
    Synced(SyncResult),
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeReport {
    pub scope_id: ContainerId,
    pub outcome: ScopeOutcome,
}

/// Summary of a sweep across every scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub scopes: Vec<ScopeReport>,
    /// Scopes not visited because the sweep was cancelled.
    pub not_visited: Vec<ContainerId>,
    pub cancelled: bool,
}

impl SweepReport {
    pub fn failures(&self) -> usize {
        self.scopes
            .iter()
            .filter(|s| matches!(s.outcome, ScopeOutcome::Failed { .. }))
            .count()
    }

    pub fn groups_merged(&self) -> usize {
        self.synced().map(|r| r.groups_merged).sum()
    }

    pub fn cards_merged(&self) -> usize {
        self.synced().map(|r| r.cards_merged).sum()
    }

    pub fn synced(&self) -> impl Iterator<Item = &SyncResult> {
        self.scopes.iter().filter_map(|s| match &s.outcome {
            ScopeOutcome::Synced(result) => Some(result),
            ScopeOutcome::Failed { .. } => None,
        })
    }

    /// `Err(PartialFailure)` when any scope failed.
    ///
    /// # Errors
    /// Returns [`CoreError::PartialFailure`] with the failed and total counts.
    pub fn into_result(self) -> Result<Self, CoreError> {
        let failed = self.failures();
        if failed > 0 {
            return Err(CoreError::PartialFailure {
                failed,
                total: self.scopes.len(),
            });
        }
        Ok(self)
    }
}
