//! Partitioning cards into merge groups and deciding what each group needs.
//!
//! Everything here is pure: the engine feeds in a snapshot and gets back
//! groups and plans, then does the I/O.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

use super::types::{GroupKey, SkipReason, SkippedCard};
use crate::card::state::is_aligned;
use crate::card::{classify, timer_end_time, Card, CardState};

/// A card together with its timer end time in the snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedCard {
    pub card: Card,
    pub end: DateTime<Utc>,
}

/// Cards of one scope, bucketed by `(stage, state)`.
#[derive(Debug, Default)]
pub struct Partition {
    pub groups: BTreeMap<GroupKey, Vec<TimedCard>>,
    pub skipped: Vec<SkippedCard>,
    /// Non-mastered cards seen, whether grouped, ready or skipped, plus
    /// malformed mastered cards.
    pub considered: usize,
}

/// Bucket `cards` by stage and classified state at `now`.
///
/// Invariant-violating cards and timed cards missing their timer field are
/// reported in [`Partition::skipped`]. Validation runs before the mastered
/// check, so a malformed mastered card is reported too. Valid mastered cards
/// and `Ready` cards are dropped.
pub fn partition(cards: Vec<Card>, now: DateTime<Utc>) -> Partition {
    let mut out = Partition::default();
    for card in cards {
        if let Err(err) = card.validate() {
            tracing::warn!(card_id = %card.id, error = %err, "skipping malformed card");
            out.considered += 1;
            out.skipped.push(SkippedCard {
                card_id: card.id.clone(),
                reason: SkipReason::InvariantViolation {
                    message: err.to_string(),
                },
            });
            continue;
        }
        if card.is_mastered {
            continue;
        }
        out.considered += 1;

        let state = classify(&card, now);
        if !state.has_timer() {
            continue;
        }
        let Some(end) = timer_end_time(&card, state) else {
            tracing::warn!(card_id = %card.id, %state, "timed state without timer field");
            out.skipped.push(SkippedCard {
                card_id: card.id.clone(),
                reason: SkipReason::MissingTimer { state },
            });
            continue;
        };
        let key = GroupKey {
            stage: card.stage,
            state,
        };
        out.groups.entry(key).or_default().push(TimedCard { card, end });
    }
    out
}

/// What a group needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePlan {
    /// Fewer than two cards.
    Singleton,
    /// Within tolerance and every card already sits on `target`.
    AlreadyAligned { target: DateTime<Utc>, spread: Duration },
    /// Within tolerance; pull every card onto `target`.
    Merge { target: DateTime<Utc>, spread: Duration },
    /// Spread is larger than the tolerance window.
    Diverged { spread: Duration },
}

impl MergePlan {
    pub fn spread(&self) -> Duration {
        match self {
            MergePlan::Singleton => Duration::zero(),
            MergePlan::AlreadyAligned { spread, .. }
            | MergePlan::Merge { spread, .. }
            | MergePlan::Diverged { spread } => *spread,
        }
    }

    /// The earliest end time, when the group is within tolerance.
    pub fn target(&self) -> Option<DateTime<Utc>> {
        match self {
            MergePlan::AlreadyAligned { target, .. } | MergePlan::Merge { target, .. } => {
                Some(*target)
            }
            MergePlan::Singleton | MergePlan::Diverged { .. } => None,
        }
    }
}

/// Decide whether `members` (all in `state`) merge under `tolerance`.
///
/// The spread is inclusive: a spread exactly equal to `tolerance` merges.
/// The target is always the earliest end time, so merging never delays a card.
pub fn plan_group(members: &[TimedCard], state: CardState, tolerance: Duration) -> MergePlan {
    if members.len() < 2 {
        return MergePlan::Singleton;
    }
    let ends = members.iter().map(|m| m.end);
    let (Some(earliest), Some(latest)) = (ends.clone().min(), ends.max()) else {
        return MergePlan::Singleton;
    };
    let spread = latest - earliest;
    if spread > tolerance {
        return MergePlan::Diverged { spread };
    }
    if members.iter().all(|m| is_aligned(&m.card, state, earliest)) {
        MergePlan::AlreadyAligned {
            target: earliest,
            spread,
        }
    } else {
        MergePlan::Merge {
            target: earliest,
            spread,
        }
    }
}
