//! Card record and its invariants.
//!
//! A card carries its spaced-repetition progress (stage, mastery, counters)
//! and several independent nullable timer fields. Which of those timers is
//! in force is never read directly: route every read through
//! [`state::classify`].

pub mod state;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, Result};

pub use state::{classify, timer_end_time, CardState};

pub type CardId = String;
pub type ContainerId = String;

/// Highest stage a card can reach. Reaching it marks the card mastered.
pub const MAX_STAGE: u8 = 6;

/// A flashcard's review schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub id: CardId,
    /// The container (subfolder) the card lives in.
    pub container_id: ContainerId,
    /// 0 = new, [`MAX_STAGE`] = graduated.
    pub stage: u8,
    pub is_mastered: bool,
    /// Number of times the card reached [`MAX_STAGE`].
    pub master_cycles: u32,
    pub mastered_at: Option<DateTime<Utc>>,
    pub correct_total: u32,
    pub wrong_total: u32,
    pub last_reviewed_at: Option<DateTime<Utc>>,
    pub next_review_at: Option<DateTime<Utc>>,
    /// End of the post-answer cool-down.
    pub waiting_until: Option<DateTime<Utc>>,
    /// Whether the cool-down was triggered by a wrong answer.
    pub is_from_wrong_answer: bool,
    pub is_overdue: bool,
    /// End of the overdue grace period.
    pub overdue_deadline: Option<DateTime<Utc>>,
    /// A hold suppressing all other state.
    pub frozen_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Bumped by the store on every write. Used for optimistic concurrency.
    #[serde(default)]
    pub version: u64,
}

/// Timer-bearing fields to overwrite. `None` leaves the stored value alone.
///
/// This is the only shape of write the synchronization engine issues, so it
/// can never touch stage, counters or mastery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerPatch {
    pub waiting_until: Option<DateTime<Utc>>,
    pub next_review_at: Option<DateTime<Utc>>,
    pub frozen_until: Option<DateTime<Utc>>,
    pub overdue_deadline: Option<DateTime<Utc>>,
}

impl TimerPatch {
    pub fn is_empty(&self) -> bool {
        self.waiting_until.is_none()
            && self.next_review_at.is_none()
            && self.frozen_until.is_none()
            && self.overdue_deadline.is_none()
    }
}

impl Card {
    /// Create a fresh card at stage 0 with no review history.
    pub fn new(container_id: impl Into<ContainerId>, now: DateTime<Utc>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), container_id, now)
    }

    pub fn with_id(
        id: impl Into<CardId>,
        container_id: impl Into<ContainerId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            container_id: container_id.into(),
            stage: 0,
            is_mastered: false,
            master_cycles: 0,
            mastered_at: None,
            correct_total: 0,
            wrong_total: 0,
            last_reviewed_at: None,
            next_review_at: None,
            waiting_until: None,
            is_from_wrong_answer: false,
            is_overdue: false,
            overdue_deadline: None,
            frozen_until: None,
            created_at: now,
            version: 0,
        }
    }

    /// Classify this card at `now`.
    pub fn state(&self, now: DateTime<Utc>) -> CardState {
        classify(self, now)
    }

    /// Check the card invariants.
    ///
    /// # Errors
    /// Returns [`CoreError::InvariantViolation`] describing the first broken
    /// invariant.
    pub fn validate(&self) -> Result<()> {
        let violation = |message: String| CoreError::InvariantViolation {
            card_id: self.id.clone(),
            message,
        };
        if self.stage > MAX_STAGE {
            return Err(violation(format!(
                "stage {} outside 0..={MAX_STAGE}",
                self.stage
            )));
        }
        if self.is_mastered && self.stage != MAX_STAGE {
            return Err(violation(format!(
                "mastered card at stage {}",
                self.stage
            )));
        }
        if self.is_mastered && self.master_cycles == 0 {
            return Err(violation("mastered card with zero master cycles".into()));
        }
        Ok(())
    }

    /// Overwrite the timer fields named by `patch`.
    pub fn apply_timers(&mut self, patch: &TimerPatch) {
        if let Some(t) = patch.waiting_until {
            self.waiting_until = Some(t);
        }
        if let Some(t) = patch.next_review_at {
            self.next_review_at = Some(t);
        }
        if let Some(t) = patch.frozen_until {
            self.frozen_until = Some(t);
        }
        if let Some(t) = patch.overdue_deadline {
            self.overdue_deadline = Some(t);
        }
    }
}
