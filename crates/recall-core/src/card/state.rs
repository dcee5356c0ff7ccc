//! Card state classification.
//!
//! ## Precedence
//!
//! ```text
//! Frozen > Overdue > Waiting(Correct | Wrong) > Ready
//! ```
//!
//! The first matching rule wins. Classification is pure and never consults
//! anything but the card and the supplied clock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Card, TimerPatch};

/// Lifecycle state of a non-mastered card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardState {
    Frozen,
    Overdue,
    WaitingCorrect,
    WaitingWrong,
    /// No outstanding timer.
    Ready,
}

impl CardState {
    /// Whether cards in this state carry a timer worth synchronizing.
    pub fn has_timer(self) -> bool {
        !matches!(self, CardState::Ready)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CardState::Frozen => "frozen",
            CardState::Overdue => "overdue",
            CardState::WaitingCorrect => "waiting_correct",
            CardState::WaitingWrong => "waiting_wrong",
            CardState::Ready => "ready",
        }
    }

    /// The patch that moves a card in this state onto `end`.
    ///
    /// Waiting states rewrite both the cool-down and the next review time.
    pub fn timer_patch(self, end: DateTime<Utc>) -> TimerPatch {
        match self {
            CardState::Frozen => TimerPatch {
                frozen_until: Some(end),
                ..TimerPatch::default()
            },
            CardState::Overdue => TimerPatch {
                overdue_deadline: Some(end),
                ..TimerPatch::default()
            },
            CardState::WaitingCorrect | CardState::WaitingWrong => TimerPatch {
                waiting_until: Some(end),
                next_review_at: Some(end),
                ..TimerPatch::default()
            },
            CardState::Ready => TimerPatch::default(),
        }
    }
}

impl std::fmt::Display for CardState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a card to its lifecycle state at `now`.
///
/// An overdue card stays `Overdue` past its `overdue_deadline`; only the
/// owning scheduler clears the flag.
pub fn classify(card: &Card, now: DateTime<Utc>) -> CardState {
    if matches!(card.frozen_until, Some(until) if until > now) {
        return CardState::Frozen;
    }
    if card.is_overdue {
        return CardState::Overdue;
    }
    if matches!(card.waiting_until, Some(until) if until > now) {
        return if card.is_from_wrong_answer {
            CardState::WaitingWrong
        } else {
            CardState::WaitingCorrect
        };
    }
    CardState::Ready
}

/// The timestamp at which a card in `state` becomes actionable again.
///
/// `None` when the relevant field is unset, which only happens for malformed
/// data (e.g. an overdue flag without a deadline).
pub fn timer_end_time(card: &Card, state: CardState) -> Option<DateTime<Utc>> {
    match state {
        CardState::Frozen => card.frozen_until,
        CardState::Overdue => card.overdue_deadline,
        CardState::WaitingCorrect | CardState::WaitingWrong => card.waiting_until,
        CardState::Ready => None,
    }
}

/// Whether `card` already sits exactly on `end` for every field that
/// `state.timer_patch(end)` would write.
pub fn is_aligned(card: &Card, state: CardState, end: DateTime<Utc>) -> bool {
    match state {
        CardState::Frozen => card.frozen_until == Some(end),
        CardState::Overdue => card.overdue_deadline == Some(end),
        CardState::WaitingCorrect | CardState::WaitingWrong => {
            card.waiting_until == Some(end) && card.next_review_at == Some(end)
        }
        CardState::Ready => true,
    }
}
