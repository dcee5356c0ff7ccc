//! Entry points that start synchronization passes.
//!
//! Two paths reach the engine: right after an answer is recorded (scoped to
//! the answered card's container) and a periodic sweep over every scope. Both
//! may race on the same scope; the engine serializes them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::store::ContainerHierarchy;
use crate::sync::{ScopeOutcome, ScopeReport, SweepReport, SyncEngine, SyncResult};

/// Cloneable cancellation flag checked between scopes of a sweep.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct SyncTrigger {
    engine: Arc<SyncEngine>,
    hierarchy: Arc<dyn ContainerHierarchy>,
}

impl SyncTrigger {
    pub fn new(engine: Arc<SyncEngine>, hierarchy: Arc<dyn ContainerHierarchy>) -> Self {
        Self { engine, hierarchy }
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Synchronize the scope owning `card_id` after an answer was written.
    ///
    /// The card's stored container wins over `container_id` when they differ.
    ///
    /// # Errors
    /// `NotFound` for an unknown card or container, or the engine's error.
    pub fn on_answer_recorded(
        &self,
        card_id: &str,
        container_id: &str,
        now: DateTime<Utc>,
    ) -> Result<SyncResult> {
        let actual = self.hierarchy.container_of(card_id)?;
        if actual != container_id {
            debug!(card_id, reported = container_id, %actual, "card container differs from caller");
        }
        let scope = self.hierarchy.scope_of(&actual)?;
        debug!(card_id, %scope, "post-answer sync");
        self.engine.synchronize_container(&scope, now)
    }

    /// Synchronize every scope in order.
    ///
    /// A failing scope is recorded and the sweep moves on. `cancel` is checked
    /// before each scope, never during one.
    ///
    /// # Errors
    /// Only when the scope list itself cannot be read.
    pub fn sweep_all(&self, now: DateTime<Utc>, cancel: &CancelToken) -> Result<SweepReport> {
        let scopes = self.hierarchy.sync_scopes()?;
        let mut report = SweepReport::default();

        let mut pending = scopes.into_iter();
        while let Some(scope_id) = pending.next() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                report.not_visited.push(scope_id);
                report.not_visited.extend(pending);
                break;
            }
            let outcome = match self.engine.synchronize_container(&scope_id, now) {
                Ok(result) => ScopeOutcome::Synced(result),
                Err(err) => {
                    warn!(%scope_id, error = %err, "scope sync failed, continuing sweep");
                    ScopeOutcome::Failed {
                        error: err.to_string(),
                    }
                }
            };
            report.scopes.push(ScopeReport { scope_id, outcome });
        }

        info!(
            scopes = report.scopes.len(),
            failures = report.failures(),
            groups_merged = report.groups_merged(),
            cards_merged = report.cards_merged(),
            cancelled = report.cancelled,
            "sweep finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::Card;
    use crate::store::{CardQuery, CardStore, CardUpdate, Container, MemoryStore};
    use chrono::Duration;
    use std::thread;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn waiting(id: &str, container: &str, minutes: i64) -> Card {
        let mut card = Card::with_id(id, container, now());
        card.stage = 1;
        card.waiting_until = Some(now() + Duration::minutes(minutes));
        card.next_review_at = card.waiting_until;
        card
    }

    fn setup() -> (Arc<MemoryStore>, SyncTrigger) {
        let store = Arc::new(MemoryStore::new());
        for (id, parent) in [("lang", None), ("fr", Some("lang")), ("math", None)] {
            let mut c = Container::new(id, id);
            c.parent_id = parent.map(str::to_string);
            store.insert_container(&c).unwrap();
        }
        for card in [
            waiting("fr1", "fr", 10),
            waiting("fr2", "fr", 40),
            waiting("m1", "math", 5),
            waiting("m2", "math", 50),
        ] {
            store.insert_card(&card).unwrap();
        }
        let engine = Arc::new(SyncEngine::new(
            store.clone(),
            store.clone(),
            Duration::minutes(60),
        ));
        let trigger = SyncTrigger::new(engine, store.clone());
        (store, trigger)
    }

    #[test]
    fn answer_syncs_the_parent_scope() {
        let (store, trigger) = setup();
        let result = trigger.on_answer_recorded("fr1", "fr", now()).unwrap();
        assert_eq!(result.scope_id, "lang");
        assert_eq!(result.cards_merged, 1);
        assert_eq!(
            store.get_card("fr2").unwrap().waiting_until,
            Some(now() + Duration::minutes(10))
        );
        // Other scopes untouched.
        assert_eq!(
            store.get_card("m2").unwrap().waiting_until,
            Some(now() + Duration::minutes(50))
        );
    }

    #[test]
    fn answer_in_nested_container_syncs_the_top_level_scope() {
        let (store, trigger) = setup();
        store
            .insert_container(&Container::new("fr-verbs", "Verbs").child_of("fr"))
            .unwrap();
        store.insert_card(&waiting("v1", "fr-verbs", 5)).unwrap();

        let result = trigger.on_answer_recorded("v1", "fr-verbs", now()).unwrap();
        assert_eq!(result.scope_id, "lang");
        assert_eq!(result.cards_merged, 2);
        assert_eq!(
            store.get_card("fr2").unwrap().waiting_until,
            Some(now() + Duration::minutes(5))
        );
    }

    #[test]
    fn answer_on_unknown_card_is_not_found() {
        let (_, trigger) = setup();
        let err = trigger.on_answer_recorded("ghost", "fr", now()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn sweep_visits_every_scope() {
        let (_, trigger) = setup();
        let report = trigger.sweep_all(now(), &CancelToken::new()).unwrap();
        assert_eq!(report.scopes.len(), 2);
        assert_eq!(report.cards_merged(), 2);
        assert!(!report.cancelled);
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn cancelled_sweep_visits_nothing() {
        let (store, trigger) = setup();
        let cancel = CancelToken::new();
        cancel.cancel();
        let report = trigger.sweep_all(now(), &cancel).unwrap();
        assert!(report.cancelled);
        assert!(report.scopes.is_empty());
        assert_eq!(report.not_visited, vec!["lang".to_string(), "math".to_string()]);
        assert_eq!(
            store.get_card("fr2").unwrap().waiting_until,
            Some(now() + Duration::minutes(40))
        );
    }

    #[test]
    fn failing_scope_does_not_stop_sweep() {
        struct BrokenQuery(Arc<MemoryStore>);
        impl CardStore for BrokenQuery {
            fn get_card(&self, id: &str) -> Result<Card> {
                self.0.get_card(id)
            }
            fn query_cards(&self, query: &CardQuery) -> Result<Vec<Card>> {
                if query.containers.iter().any(|c| c == "lang") {
                    return Err(crate::error::CoreError::Database(
                        crate::error::DatabaseError::Locked,
                    ));
                }
                self.0.query_cards(query)
            }
            fn update_card(&self, id: &str, update: &CardUpdate) -> Result<Card> {
                self.0.update_card(id, update)
            }
            fn insert_card(&self, card: &Card) -> Result<()> {
                self.0.insert_card(card)
            }
        }

        let (store, _) = setup();
        let engine = Arc::new(SyncEngine::new(
            Arc::new(BrokenQuery(store.clone())),
            store.clone(),
            Duration::minutes(60),
        ));
        let trigger = SyncTrigger::new(engine, store.clone());
        let report = trigger.sweep_all(now(), &CancelToken::new()).unwrap();
        assert_eq!(report.failures(), 1);
        assert_eq!(report.cards_merged(), 1);
        assert!(report.into_result().unwrap_err().to_string().contains("1 of 2"));
    }

    #[test]
    fn concurrent_triggers_on_different_scopes() {
        let (store, trigger) = setup();
        let trigger = Arc::new(trigger);
        let handles: Vec<_> = [("fr1", "fr"), ("m1", "math"), ("fr2", "fr"), ("m2", "math")]
            .into_iter()
            .map(|(card, container)| {
                let trigger = Arc::clone(&trigger);
                thread::spawn(move || trigger.on_answer_recorded(card, container, now()).unwrap())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(
            store.get_card("fr2").unwrap().waiting_until,
            Some(now() + Duration::minutes(10))
        );
        assert_eq!(
            store.get_card("m2").unwrap().waiting_until,
            Some(now() + Duration::minutes(5))
        );
    }
}
