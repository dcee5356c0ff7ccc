//! Timer synchronization engine.
//!
//! Within one scope, cards sharing a stage and a classified state are
//! collapsed onto the earliest timer among them when their timers already
//! lie within the tolerance window.
//!
//! ## Pass
//!
//! ```text
//! lock scope -> load snapshot -> partition -> plan each group -> write back
//! ```
//!
//! Write-back is optimistic. Each card is re-read before its group is
//! written and every write carries the version from the snapshot. A card
//! that moved in between (typically a fresh answer) is dropped from the
//! group and the target is recomputed from the cards that remain. A store
//! failure other than a conflict rolls the group back.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use super::grouping::{partition, plan_group, MergePlan, TimedCard};
use super::locks::ContainerLocks;
use super::types::{GroupKey, GroupOutcome, GroupStatus, SkipReason, SkippedCard, SyncResult};
use crate::card::state::is_aligned;
use crate::card::{Card, CardId, CardState, TimerPatch};
use crate::error::{CoreError, Result};
use crate::storage::SyncConfig;
use crate::store::{CardQuery, CardStore, CardUpdate, ContainerHierarchy};

/// A card this pass has written, with the version the store returned.
#[derive(Debug, Clone, Copy)]
struct Written {
    version: u64,
    /// `None` once the card was put back on its own timer.
    at: Option<DateTime<Utc>>,
}

/// The patch restoring `card`'s snapshot timer for `state`.
fn restore_patch(card: &Card, state: CardState) -> TimerPatch {
    match state {
        CardState::Frozen => TimerPatch {
            frozen_until: card.frozen_until,
            ..TimerPatch::default()
        },
        CardState::Overdue => TimerPatch {
            overdue_deadline: card.overdue_deadline,
            ..TimerPatch::default()
        },
        CardState::WaitingCorrect | CardState::WaitingWrong => TimerPatch {
            waiting_until: card.waiting_until,
            next_review_at: card.next_review_at,
            ..TimerPatch::default()
        },
        CardState::Ready => TimerPatch::default(),
    }
}

pub struct SyncEngine {
    store: Arc<dyn CardStore>,
    hierarchy: Arc<dyn ContainerHierarchy>,
    tolerance: Duration,
    locks: ContainerLocks,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn CardStore>,
        hierarchy: Arc<dyn ContainerHierarchy>,
        tolerance: Duration,
    ) -> Self {
        Self {
            store,
            hierarchy,
            tolerance,
            locks: ContainerLocks::new(),
        }
    }

    pub fn from_config(
        store: Arc<dyn CardStore>,
        hierarchy: Arc<dyn ContainerHierarchy>,
        config: &SyncConfig,
    ) -> Self {
        Self::new(store, hierarchy, config.tolerance())
    }

    pub fn tolerance(&self) -> Duration {
        self.tolerance
    }

    pub fn hierarchy(&self) -> &Arc<dyn ContainerHierarchy> {
        &self.hierarchy
    }

    /// Merge near-identical timers among the cards under the scope owning
    /// `container_id`.
    ///
    /// Any container may be named; the pass runs over its top-level scope and
    /// reports that scope's id. Passes over the same scope are serialized.
    /// Group failures and unreadable rows are recorded in the result rather
    /// than returned.
    ///
    /// # Errors
    /// `NotFound` for an unknown container, or a store error while loading
    /// the snapshot.
    pub fn synchronize_container(
        &self,
        container_id: &str,
        now: DateTime<Utc>,
    ) -> Result<SyncResult> {
        let scope_id = self.hierarchy.scope_of(container_id)?;
        let handle = self.locks.handle(&scope_id);
        let _guard = ContainerLocks::lock(&handle);

        let containers = self.hierarchy.containers_in_scope(&scope_id)?;
        // Mastered cards are loaded so malformed ones surface as skipped.
        let scan = self.store.scan_cards(&CardQuery::all_in(containers))?;
        let partition = partition(scan.cards, now);

        let mut result = SyncResult::new(&scope_id);
        result.total_cards_considered = partition.considered + scan.unreadable.len();
        result.skipped = scan
            .unreadable
            .into_iter()
            .map(|row| SkippedCard {
                card_id: row.card_id,
                reason: SkipReason::Unreadable {
                    message: row.message,
                },
            })
            .chain(partition.skipped)
            .collect();

        for (key, members) in partition.groups {
            let outcome = self.process_group(key, members, &mut result.conflicts);
            if let GroupStatus::Merged { changed, .. } = outcome.status {
                result.groups_merged += 1;
                result.cards_merged += changed;
            }
            result.groups.push(outcome);
        }

        info!(
            %scope_id,
            considered = result.total_cards_considered,
            groups = result.groups.len(),
            groups_merged = result.groups_merged,
            cards_merged = result.cards_merged,
            skipped = result.skipped.len(),
            conflicts = result.conflicts.len(),
            "synchronized scope"
        );
        Ok(result)
    }

    fn process_group(
        &self,
        key: GroupKey,
        members: Vec<TimedCard>,
        conflicts: &mut Vec<CardId>,
    ) -> GroupOutcome {
        let card_ids = members.iter().map(|m| m.card.id.clone()).collect();
        let plan = plan_group(&members, key.state, self.tolerance);
        let spread_secs = plan.spread().num_seconds();

        let status = match plan {
            MergePlan::Singleton => GroupStatus::Singleton,
            MergePlan::AlreadyAligned { target, .. } => GroupStatus::AlreadyAligned { target },
            MergePlan::Diverged { spread } => {
                debug!(%key, spread_secs = spread.num_seconds(), "group diverged, left unchanged");
                GroupStatus::Diverged
            }
            MergePlan::Merge { .. } => match self.write_group(key, members, conflicts) {
                Ok(status) => status,
                Err(err) => {
                    warn!(%key, error = %err, "group write failed, rolled back");
                    GroupStatus::Failed {
                        error: err.to_string(),
                    }
                }
            },
        };

        GroupOutcome {
            key,
            card_ids,
            spread_secs,
            status,
        }
    }

    fn write_group(
        &self,
        key: GroupKey,
        members: Vec<TimedCard>,
        conflicts: &mut Vec<CardId>,
    ) -> Result<GroupStatus> {
        let mut live = Vec::with_capacity(members.len());
        for member in members {
            match self.store.get_card(&member.card.id) {
                Ok(fresh) if fresh.version == member.card.version => live.push(member),
                Ok(_) | Err(CoreError::NotFound { .. }) => {
                    warn!(card_id = %member.card.id, %key, "card changed since snapshot, excluded");
                    conflicts.push(member.card.id);
                }
                Err(err) => return Err(err),
            }
        }

        let mut written: HashMap<CardId, Written> = HashMap::new();
        'plan: loop {
            let plan = plan_group(&live, key.state, self.tolerance);
            let target = plan.target();

            for idx in 0..live.len() {
                let member = &live[idx];
                let id = member.card.id.clone();
                let prior = written.get(&id).copied();
                let patch = match (target, prior) {
                    (Some(t), Some(w)) if w.at == Some(t) => continue,
                    (Some(t), None) if is_aligned(&member.card, key.state, t) => continue,
                    (Some(t), _) => key.state.timer_patch(t),
                    (None, Some(w)) if w.at.is_some() => restore_patch(&member.card, key.state),
                    (None, _) => continue,
                };
                let expected = prior.map_or(member.card.version, |w| w.version);

                match self.store.update_card(&id, &CardUpdate::timers(patch, expected)) {
                    Ok(updated) => {
                        written.insert(
                            id,
                            Written {
                                version: updated.version,
                                at: target,
                            },
                        );
                    }
                    Err(CoreError::WriteConflict { .. }) | Err(CoreError::NotFound { .. }) => {
                        warn!(card_id = %id, %key, "write conflict, recomputing group target");
                        live.remove(idx);
                        written.remove(&id);
                        conflicts.push(id);
                        continue 'plan;
                    }
                    Err(err) => {
                        self.rollback(key.state, &live, &written);
                        return Err(err);
                    }
                }
            }

            // A card moved and then moved back to its own timer did not change.
            let changed = match target {
                Some(t) => live
                    .iter()
                    .filter(|m| written.get(&m.card.id).is_some_and(|w| w.at.is_some()))
                    .filter(|m| !is_aligned(&m.card, key.state, t))
                    .count(),
                None => 0,
            };
            let status = match plan {
                MergePlan::Merge { target, spread } | MergePlan::AlreadyAligned { target, spread } => {
                    if changed > 0 {
                        info!(
                            %key,
                            changed,
                            target = %target.to_rfc3339(),
                            spread_secs = spread.num_seconds(),
                            "merged group timers"
                        );
                        GroupStatus::Merged { target, changed }
                    } else {
                        GroupStatus::AlreadyAligned { target }
                    }
                }
                MergePlan::Singleton => GroupStatus::Singleton,
                MergePlan::Diverged { .. } => GroupStatus::Diverged,
            };
            return Ok(status);
        }
    }

    /// Best effort: put every card this pass moved back on its own timer.
    fn rollback(&self, state: CardState, live: &[TimedCard], written: &HashMap<CardId, Written>) {
        for member in live {
            let Some(w) = written.get(&member.card.id) else {
                continue;
            };
            if w.at.is_none() {
                continue;
            }
            let update = CardUpdate::timers(restore_patch(&member.card, state), w.version);
            if let Err(err) = self.store.update_card(&member.card.id, &update) {
                warn!(card_id = %member.card.id, error = %err, "rollback failed");
            }
        }
    }
}
