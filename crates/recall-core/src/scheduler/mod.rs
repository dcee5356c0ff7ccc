//! Review scheduler.
//!
//! [`ReviewScheduler`] holds the pure stage transitions: given a card and an
//! answer it returns the next card. [`ReviewService`] wraps it with the
//! record store (read, transition, versioned write).
//!
//! ## Stage transitions
//!
//! ```text
//! correct: stage -> min(stage + 1, 6)     (reaching 6 masters the card)
//! wrong:   stage -> stage / 2             (regression keeps partial progress)
//! ```

pub mod intervals;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::card::{Card, MAX_STAGE};
use crate::error::{ConfigError, CoreError, Result};
use crate::storage::SchedulerConfig;
use crate::store::{CardStore, CardUpdate};

pub use intervals::{hours_after, IntervalTable, DEFAULT_INTERVAL_HOURS, MAX_OFFSET_HOURS};

/// Attempts at a versioned write before giving up on a racing writer.
const MAX_WRITE_ATTEMPTS: usize = 3;

/// Pure card transitions.
#[derive(Debug, Clone, Default)]
pub struct ReviewScheduler {
    intervals: IntervalTable,
}

impl ReviewScheduler {
    pub fn new(intervals: IntervalTable) -> Self {
        Self { intervals }
    }

    /// # Errors
    /// `InvalidValue` when the configured interval table is empty or holds an
    /// entry above [`MAX_OFFSET_HOURS`].
    pub fn from_config(config: &SchedulerConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(IntervalTable::new(config.interval_hours.clone())?))
    }

    pub fn intervals(&self) -> &IntervalTable {
        &self.intervals
    }

    /// Apply an answer to `card`.
    ///
    /// `explicit_next_review_at` overrides the interval table. The post-answer
    /// cool-down (`waiting_until`) ends at the next review time, except for
    /// mastered cards which carry no timer. Answering clears the overdue flag.
    pub fn apply_answer(
        &self,
        card: &Card,
        is_correct: bool,
        now: DateTime<Utc>,
        explicit_next_review_at: Option<DateTime<Utc>>,
    ) -> Card {
        let mut next = card.clone();
        let stage = card.stage.min(MAX_STAGE);

        if is_correct {
            next.stage = (stage + 1).min(MAX_STAGE);
            next.correct_total = next.correct_total.saturating_add(1);
            if next.stage == MAX_STAGE && !card.is_mastered {
                next.is_mastered = true;
                next.master_cycles = next.master_cycles.saturating_add(1);
                next.mastered_at = Some(now);
            }
        } else {
            next.stage = stage / 2;
            next.wrong_total = next.wrong_total.saturating_add(1);
            // A regressed card is no longer mastered; its cycle count stays.
            next.is_mastered = false;
        }

        next.last_reviewed_at = Some(now);
        next.is_from_wrong_answer = !is_correct;
        let next_review_at = explicit_next_review_at
            .unwrap_or_else(|| self.intervals.compute_next_review(next.stage, now));
        next.next_review_at = Some(next_review_at);
        next.waiting_until = if next.is_mastered {
            None
        } else {
            Some(next_review_at)
        };
        next.is_overdue = false;
        next.overdue_deadline = None;
        next
    }

    /// Hold the card for `duration_hours` from `now`, capped at
    /// [`MAX_OFFSET_HOURS`].
    pub fn freeze(&self, card: &Card, duration_hours: u32, now: DateTime<Utc>) -> Card {
        let mut next = card.clone();
        next.frozen_until = Some(hours_after(now, duration_hours));
        next
    }

    pub fn unfreeze(&self, card: &Card) -> Card {
        let mut next = card.clone();
        next.frozen_until = None;
        next
    }

    /// Flag the card overdue with a grace period of `deadline_hours`, capped
    /// at [`MAX_OFFSET_HOURS`].
    pub fn mark_overdue(&self, card: &Card, deadline_hours: u32, now: DateTime<Utc>) -> Card {
        let mut next = card.clone();
        next.is_overdue = true;
        next.overdue_deadline = Some(hours_after(now, deadline_hours));
        next
    }

    /// Back to the creation state. Identity and version are kept.
    pub fn reset(&self, card: &Card) -> Card {
        let mut next = Card::with_id(card.id.clone(), card.container_id.clone(), card.created_at);
        next.version = card.version;
        next
    }
}

/// Store-backed review operations.
///
/// Every operation reads the card, applies a pure transition and writes the
/// whole card guarded by the version it read. A concurrent timer write from
/// the synchronization engine causes a re-read and retry, so the answer
/// always lands on the freshest record.
pub struct ReviewService {
    store: Arc<dyn CardStore>,
    scheduler: ReviewScheduler,
}

impl ReviewService {
    pub fn new(store: Arc<dyn CardStore>, scheduler: ReviewScheduler) -> Self {
        Self { store, scheduler }
    }

    pub fn scheduler(&self) -> &ReviewScheduler {
        &self.scheduler
    }

    /// # Errors
    /// `NotFound` for an unknown card; store errors otherwise.
    pub fn record_answer(
        &self,
        card_id: &str,
        is_correct: bool,
        now: DateTime<Utc>,
        explicit_next_review_at: Option<DateTime<Utc>>,
    ) -> Result<Card> {
        let card = self.transition(card_id, |card| {
            self.scheduler
                .apply_answer(card, is_correct, now, explicit_next_review_at)
        })?;
        debug!(
            card_id,
            is_correct,
            stage = card.stage,
            mastered = card.is_mastered,
            "recorded answer"
        );
        Ok(card)
    }

    /// # Errors
    /// `NotFound` for an unknown card; store errors otherwise.
    pub fn freeze(&self, card_id: &str, duration_hours: u32, now: DateTime<Utc>) -> Result<Card> {
        self.transition(card_id, |card| self.scheduler.freeze(card, duration_hours, now))
    }

    /// # Errors
    /// `NotFound` for an unknown card; store errors otherwise.
    pub fn unfreeze(&self, card_id: &str) -> Result<Card> {
        self.transition(card_id, |card| self.scheduler.unfreeze(card))
    }

    /// # Errors
    /// `NotFound` for an unknown card; store errors otherwise.
    pub fn mark_overdue(
        &self,
        card_id: &str,
        deadline_hours: u32,
        now: DateTime<Utc>,
    ) -> Result<Card> {
        self.transition(card_id, |card| {
            self.scheduler.mark_overdue(card, deadline_hours, now)
        })
    }

    /// # Errors
    /// `NotFound` for an unknown card; store errors otherwise.
    pub fn reset(&self, card_id: &str) -> Result<Card> {
        self.transition(card_id, |card| self.scheduler.reset(card))
    }

    fn transition(&self, card_id: &str, apply: impl Fn(&Card) -> Card) -> Result<Card> {
        let mut attempt = 1;
        loop {
            let current = self.store.get_card(card_id)?;
            let next = apply(&current);
            match self.store.update_card(card_id, &CardUpdate::full(next)) {
                Err(CoreError::WriteConflict { .. }) if attempt < MAX_WRITE_ATTEMPTS => {
                    warn!(card_id, attempt, "card changed during review write, retrying");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
