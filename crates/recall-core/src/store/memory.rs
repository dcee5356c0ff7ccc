//! In-memory record store.
//!
//! Holds cards and containers behind `RwLock`s. Used as the test double for
//! the engine and as a store for embedders that persist elsewhere.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{CardQuery, CardStore, CardUpdate, Container, ContainerHierarchy};
use crate::card::{Card, ContainerId};
use crate::error::{CoreError, EntityKind, Result};

#[derive(Debug, Default)]
pub struct MemoryStore {
    cards: RwLock<BTreeMap<String, Card>>,
    containers: RwLock<BTreeMap<String, Container>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn cards(&self) -> RwLockReadGuard<'_, BTreeMap<String, Card>> {
        self.cards.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn cards_mut(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Card>> {
        self.cards.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn containers_guard(&self) -> RwLockReadGuard<'_, BTreeMap<String, Container>> {
        self.containers.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Overwrite a stored card verbatim, bypassing version checks.
    ///
    /// Lets tests seed malformed data or simulate a concurrent writer.
    pub fn put_raw(&self, card: Card) {
        self.cards_mut().insert(card.id.clone(), card);
    }
}

impl CardStore for MemoryStore {
    fn get_card(&self, id: &str) -> Result<Card> {
        self.cards()
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::card_not_found(id))
    }

    fn query_cards(&self, query: &CardQuery) -> Result<Vec<Card>> {
        Ok(self
            .cards()
            .values()
            .filter(|card| query.matches(card))
            .cloned()
            .collect())
    }

    fn update_card(&self, id: &str, update: &CardUpdate) -> Result<Card> {
        let mut cards = self.cards_mut();
        let stored = cards
            .get_mut(id)
            .ok_or_else(|| CoreError::card_not_found(id))?;
        if let Some(expected) = update.expected_version {
            if stored.version != expected {
                return Err(CoreError::WriteConflict {
                    card_id: id.to_string(),
                    expected,
                    actual: stored.version,
                });
            }
        }
        update.apply_to(stored);
        stored.version += 1;
        Ok(stored.clone())
    }

    fn insert_card(&self, card: &Card) -> Result<()> {
        if !self.containers_guard().contains_key(&card.container_id) {
            return Err(CoreError::container_not_found(&card.container_id));
        }
        let mut cards = self.cards_mut();
        if cards.contains_key(&card.id) {
            return Err(CoreError::AlreadyExists {
                kind: EntityKind::Card,
                id: card.id.clone(),
            });
        }
        cards.insert(card.id.clone(), card.clone());
        Ok(())
    }
}

impl ContainerHierarchy for MemoryStore {
    fn child_containers_of(&self, scope_id: &str) -> Result<Vec<ContainerId>> {
        let containers = self.containers_guard();
        if !containers.contains_key(scope_id) {
            return Err(CoreError::container_not_found(scope_id));
        }
        Ok(containers
            .values()
            .filter(|c| c.parent_id.as_deref() == Some(scope_id))
            .map(|c| c.id.clone())
            .collect())
    }

    fn container_of(&self, card_id: &str) -> Result<ContainerId> {
        self.cards()
            .get(card_id)
            .map(|card| card.container_id.clone())
            .ok_or_else(|| CoreError::card_not_found(card_id))
    }

    fn parent_of(&self, container_id: &str) -> Result<Option<ContainerId>> {
        self.containers_guard()
            .get(container_id)
            .map(|c| c.parent_id.clone())
            .ok_or_else(|| CoreError::container_not_found(container_id))
    }

    fn sync_scopes(&self) -> Result<Vec<ContainerId>> {
        Ok(self
            .containers_guard()
            .values()
            .filter(|c| c.parent_id.is_none())
            .map(|c| c.id.clone())
            .collect())
    }

    fn insert_container(&self, container: &Container) -> Result<()> {
        let mut containers = self.containers.write().unwrap_or_else(PoisonError::into_inner);
        if containers.contains_key(&container.id) {
            return Err(CoreError::AlreadyExists {
                kind: EntityKind::Container,
                id: container.id.clone(),
            });
        }
        if let Some(parent) = &container.parent_id {
            if !containers.contains_key(parent) {
                return Err(CoreError::container_not_found(parent));
            }
        }
        containers.insert(container.id.clone(), container.clone());
        Ok(())
    }

    fn containers(&self) -> Result<Vec<Container>> {
        Ok(self.containers_guard().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::TimerPatch;
    use chrono::{DateTime, Duration, Utc};

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.insert_container(&Container::new("lang", "Languages")).unwrap();
        store
            .insert_container(&Container::new("fr", "French").child_of("lang"))
            .unwrap();
        store
            .insert_container(&Container::new("de", "German").child_of("lang"))
            .unwrap();
        store
    }

    #[test]
    fn hierarchy_resolves_scopes() {
        let store = seeded();
        assert_eq!(store.sync_scopes().unwrap(), vec!["lang".to_string()]);
        assert_eq!(store.scope_of("fr").unwrap(), "lang");
        assert_eq!(store.scope_of("lang").unwrap(), "lang");
        let mut in_scope = store.containers_in_scope("lang").unwrap();
        in_scope.sort();
        assert_eq!(in_scope, vec!["de", "fr", "lang"]);
        assert!(store.child_containers_of("nope").unwrap_err().is_not_found());
    }

    #[test]
    fn nested_containers_share_the_top_level_scope() {
        let store = seeded();
        store
            .insert_container(&Container::new("fr-verbs", "Verbs").child_of("fr"))
            .unwrap();
        store
            .insert_container(&Container::new("fr-irregular", "Irregular").child_of("fr-verbs"))
            .unwrap();
        assert_eq!(store.scope_of("fr-verbs").unwrap(), "lang");
        assert_eq!(store.scope_of("fr-irregular").unwrap(), "lang");
        let mut in_scope = store.containers_in_scope("lang").unwrap();
        in_scope.sort();
        assert_eq!(in_scope, vec!["de", "fr", "fr-irregular", "fr-verbs", "lang"]);
        assert!(store.scope_of("ghost").unwrap_err().is_not_found());
    }

    #[test]
    fn update_bumps_version_and_checks_expected() {
        let store = seeded();
        let card = Card::with_id("c1", "fr", now());
        store.insert_card(&card).unwrap();

        let patch = TimerPatch {
            frozen_until: Some(now() + Duration::hours(1)),
            ..TimerPatch::default()
        };
        let updated = store.update_card("c1", &CardUpdate::timers(patch, 0)).unwrap();
        assert_eq!(updated.version, 1);

        let err = store
            .update_card("c1", &CardUpdate::timers(patch, 0))
            .unwrap_err();
        assert!(err.is_write_conflict());
    }

    #[test]
    fn insert_requires_known_container() {
        let store = seeded();
        let card = Card::with_id("c1", "missing", now());
        assert!(store.insert_card(&card).unwrap_err().is_not_found());
    }

    #[test]
    fn query_excludes_mastered_by_default() {
        let store = seeded();
        let mut mastered = Card::with_id("m", "fr", now());
        mastered.stage = 6;
        mastered.is_mastered = true;
        mastered.master_cycles = 1;
        store.insert_card(&mastered).unwrap();
        store.insert_card(&Card::with_id("a", "de", now())).unwrap();

        let query = CardQuery::active_in(store.containers_in_scope("lang").unwrap());
        let ids: Vec<_> = store
            .query_cards(&query)
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec!["a".to_string()]);
    }
}
