//! Record store and container hierarchy seams.
//!
//! The engine never issues raw queries. It reads and writes cards through
//! [`CardStore`] and resolves synchronization scopes through
//! [`ContainerHierarchy`]. Both are injected, so tests run against
//! [`MemoryStore`] and the application runs against the SQLite
//! [`Database`](crate::storage::Database).

pub mod memory;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::card::{Card, CardId, ContainerId, TimerPatch};
use crate::error::Result;

pub use memory::MemoryStore;

/// Filter for [`CardStore::query_cards`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CardQuery {
    /// Cards whose container is one of these.
    pub containers: Vec<ContainerId>,
    pub include_mastered: bool,
}

impl CardQuery {
    /// Non-mastered cards in any of `containers`.
    pub fn active_in(containers: Vec<ContainerId>) -> Self {
        Self {
            containers,
            include_mastered: false,
        }
    }

    /// Every card in any of `containers`, mastered ones included.
    pub fn all_in(containers: Vec<ContainerId>) -> Self {
        Self {
            containers,
            include_mastered: true,
        }
    }

    pub fn matches(&self, card: &Card) -> bool {
        (self.include_mastered || !card.is_mastered)
            && self.containers.iter().any(|c| *c == card.container_id)
    }
}

/// What an update writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardFields {
    /// Replace every mutable field (review scheduler writes).
    /// `id`, `container_id`, `created_at` and `version` are ignored.
    Full(Box<Card>),
    /// Overwrite timer fields only (synchronization writes).
    Timers(TimerPatch),
}

/// A single-card write, optionally guarded by the version it was computed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardUpdate {
    pub fields: CardFields,
    /// When set, the write fails with
    /// [`CoreError::WriteConflict`](crate::error::CoreError::WriteConflict)
    /// unless the stored version still matches.
    pub expected_version: Option<u64>,
}

impl CardUpdate {
    pub fn full(card: Card) -> Self {
        let expected_version = Some(card.version);
        Self {
            fields: CardFields::Full(Box::new(card)),
            expected_version,
        }
    }

    pub fn timers(patch: TimerPatch, expected_version: u64) -> Self {
        Self {
            fields: CardFields::Timers(patch),
            expected_version: Some(expected_version),
        }
    }

    /// Apply the fields to `stored`, leaving identity and version untouched.
    pub(crate) fn apply_to(&self, stored: &mut Card) {
        match &self.fields {
            CardFields::Full(card) => {
                let Card {
                    id: _,
                    container_id: _,
                    created_at: _,
                    version: _,
                    stage,
                    is_mastered,
                    master_cycles,
                    mastered_at,
                    correct_total,
                    wrong_total,
                    last_reviewed_at,
                    next_review_at,
                    waiting_until,
                    is_from_wrong_answer,
                    is_overdue,
                    overdue_deadline,
                    frozen_until,
                } = card.as_ref().clone();
                stored.stage = stage;
                stored.is_mastered = is_mastered;
                stored.master_cycles = master_cycles;
                stored.mastered_at = mastered_at;
                stored.correct_total = correct_total;
                stored.wrong_total = wrong_total;
                stored.last_reviewed_at = last_reviewed_at;
                stored.next_review_at = next_review_at;
                stored.waiting_until = waiting_until;
                stored.is_from_wrong_answer = is_from_wrong_answer;
                stored.is_overdue = is_overdue;
                stored.overdue_deadline = overdue_deadline;
                stored.frozen_until = frozen_until;
            }
            CardFields::Timers(patch) => stored.apply_timers(patch),
        }
    }
}

/// A stored row that could not be decoded into a [`Card`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnreadableCard {
    pub card_id: CardId,
    pub message: String,
}

/// Result of [`CardStore::scan_cards`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CardScan {
    pub cards: Vec<Card>,
    pub unreadable: Vec<UnreadableCard>,
}

/// Durable storage of card records.
pub trait CardStore: Send + Sync {
    /// # Errors
    /// [`CoreError::NotFound`](crate::error::CoreError::NotFound) when no card
    /// has this id.
    fn get_card(&self, id: &str) -> Result<Card>;

    /// # Errors
    /// Fails on the first row that cannot be decoded.
    fn query_cards(&self, query: &CardQuery) -> Result<Vec<Card>>;

    /// Like [`query_cards`](Self::query_cards), but rows that cannot be
    /// decoded are set aside instead of failing the whole query.
    fn scan_cards(&self, query: &CardQuery) -> Result<CardScan> {
        Ok(CardScan {
            cards: self.query_cards(query)?,
            unreadable: Vec::new(),
        })
    }

    /// Write `update` and return the stored card with its new version.
    fn update_card(&self, id: &str, update: &CardUpdate) -> Result<Card>;

    fn insert_card(&self, card: &Card) -> Result<()>;
}

/// A folder of cards. Top-level containers are synchronization scopes; a
/// scope covers every container nested below it, at any depth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub id: ContainerId,
    pub name: String,
    pub parent_id: Option<ContainerId>,
}

impl Container {
    pub fn new(id: impl Into<ContainerId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parent_id: None,
        }
    }

    pub fn child_of(mut self, parent: impl Into<ContainerId>) -> Self {
        self.parent_id = Some(parent.into());
        self
    }
}

/// The container tree.
pub trait ContainerHierarchy: Send + Sync {
    /// Direct children of `scope_id`.
    ///
    /// # Errors
    /// `NotFound` when `scope_id` is not a known container.
    fn child_containers_of(&self, scope_id: &str) -> Result<Vec<ContainerId>>;

    fn container_of(&self, card_id: &str) -> Result<ContainerId>;

    /// `None` for top-level containers.
    fn parent_of(&self, container_id: &str) -> Result<Option<ContainerId>>;

    /// Every top-level container, in a stable order.
    fn sync_scopes(&self) -> Result<Vec<ContainerId>>;

    fn insert_container(&self, container: &Container) -> Result<()>;

    fn containers(&self) -> Result<Vec<Container>>;

    /// The scope a container synchronizes under: its top-level ancestor, or
    /// itself when top-level.
    ///
    /// # Errors
    /// `NotFound` when `container_id` is not a known container.
    fn scope_of(&self, container_id: &str) -> Result<ContainerId> {
        let mut current = container_id.to_string();
        let mut seen = HashSet::new();
        while let Some(parent) = self.parent_of(&current)? {
            // A parent cycle can only come from hand-edited rows; stop at it.
            if !seen.insert(current.clone()) {
                break;
            }
            current = parent;
        }
        Ok(current)
    }

    /// The scope itself plus every descendant, parents before children.
    ///
    /// # Errors
    /// `NotFound` when `scope_id` is not a known container.
    fn containers_in_scope(&self, scope_id: &str) -> Result<Vec<ContainerId>> {
        let mut ids = vec![scope_id.to_string()];
        let mut seen: HashSet<ContainerId> = ids.iter().cloned().collect();
        let mut next = 0;
        while next < ids.len() {
            let children = self.child_containers_of(&ids[next])?;
            next += 1;
            ids.extend(children.into_iter().filter(|c| seen.insert(c.clone())));
        }
        Ok(ids)
    }
}
