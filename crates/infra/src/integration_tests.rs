//! Integration tests for the full persistence pipeline.
//!
//! Tests: create → raise → save → EventStore → load → replay
//!
//! Verifies:
//! - Replayed state equals the live state that produced the stream
//! - Concurrent writers on one stream: exactly one wins
//! - Hydration properties reach the aggregate before replay

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};

    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};

    use streamroot_core::{
        AggregateId, ContiguityViolation, DependencyContainer, DomainError, DomainResult,
        EventSourced, HydrationProperties, NullRecorder, UuidIdentifierFactory, stream_name,
    };
    use streamroot_events::DomainEvent;

    use crate::config::{StoreConfig, build_store};
    use crate::event_store::{EventStore, InMemoryEventStore, UncommittedEvent};
    use crate::registry::{RegistryError, RehydrationRegistry};
    use crate::repository::{AggregateRepository, RepositoryError};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "type", rename_all = "snake_case")]
    enum OrderEvent {
        Placed { customer: String, at: DateTime<Utc> },
        LineAdded { sku: String, quantity: u32, at: DateTime<Utc> },
        Shipped { at: DateTime<Utc> },
    }

    impl DomainEvent for OrderEvent {
        fn event_type(&self) -> &'static str {
            match self {
                Self::Placed { .. } => "order.placed",
                Self::LineAdded { .. } => "order.line_added",
                Self::Shipped { .. } => "order.shipped",
            }
        }

        fn occurred_at(&self) -> DateTime<Utc> {
            match self {
                Self::Placed { at, .. } | Self::LineAdded { at, .. } | Self::Shipped { at } => *at,
            }
        }
    }

    #[derive(Debug, Clone, Default, PartialEq)]
    struct OrderAggregate {
        customer: Option<String>,
        lines: Vec<(String, u32)>,
        shipped: bool,
        currency: String,
    }

    impl EventSourced for OrderAggregate {
        type Event = OrderEvent;

        fn on_state_changed(
            &mut self,
            event: &OrderEvent,
            _is_reconstituting: bool,
        ) -> DomainResult<()> {
            match event {
                OrderEvent::Placed { customer, .. } => {
                    if self.customer.is_some() {
                        return Err(DomainError::validation("order already placed"));
                    }
                    if customer.trim().is_empty() {
                        return Err(DomainError::validation("customer is required"));
                    }
                    self.customer = Some(customer.clone());
                }
                OrderEvent::LineAdded { sku, quantity, .. } => {
                    if self.customer.is_none() || self.shipped {
                        return Err(DomainError::validation("order is not open"));
                    }
                    if *quantity == 0 {
                        return Err(DomainError::validation("quantity must be positive"));
                    }
                    self.lines.push((sku.clone(), *quantity));
                }
                OrderEvent::Shipped { .. } => {
                    if self.lines.is_empty() {
                        return Err(DomainError::validation("cannot ship an empty order"));
                    }
                    self.shipped = true;
                }
            }
            Ok(())
        }

        fn rehydrated(
            _container: &DependencyContainer,
            properties: &HydrationProperties,
        ) -> DomainResult<Self> {
            Ok(Self {
                currency: properties
                    .get::<String>("currency")?
                    .unwrap_or_else(|| "EUR".to_string()),
                ..Self::default()
            })
        }
    }

    /// Legacy type whose fixed name would make `Order_x` + `y` collide with `Order` + `x_y`.
    #[derive(Debug, Clone, Default, PartialEq)]
    struct LegacyOrderAggregate(OrderAggregate);

    impl EventSourced for LegacyOrderAggregate {
        type Event = OrderEvent;
        const ENTITY_NAME: Option<&'static str> = Some("Order_x");

        fn on_state_changed(
            &mut self,
            event: &OrderEvent,
            is_reconstituting: bool,
        ) -> DomainResult<()> {
            self.0.on_state_changed(event, is_reconstituting)
        }
    }

    fn placed(customer: &str) -> OrderEvent {
        OrderEvent::Placed {
            customer: customer.to_string(),
            at: Utc::now(),
        }
    }

    fn line(sku: &str, quantity: u32) -> OrderEvent {
        OrderEvent::LineAdded {
            sku: sku.to_string(),
            quantity,
            at: Utc::now(),
        }
    }

    fn setup() -> Arc<AggregateRepository<InMemoryEventStore>> {
        streamroot_observability::init();
        let mut registry = RehydrationRegistry::new();
        registry.register::<OrderAggregate>().unwrap();
        let container = DependencyContainer::new(
            Arc::new(NullRecorder),
            Arc::new(UuidIdentifierFactory::with_prefix("ord").unwrap()),
        );
        Arc::new(AggregateRepository::new(InMemoryEventStore::new(), registry, container))
    }

    #[test]
    fn create_save_load_round_trip() {
        let repo = setup();
        let mut order = repo.create::<OrderAggregate>(None).unwrap();
        assert!(order.id().as_str().starts_with("ord_"));

        order.raise(placed("acme")).unwrap();
        order.raise(line("widget", 3)).unwrap();
        order.raise(OrderEvent::Shipped { at: Utc::now() }).unwrap();
        let live_state = order.state().clone();

        assert_eq!(repo.save(&mut order).unwrap(), Some(3));

        let loaded = repo
            .load::<OrderAggregate>(order.id(), &HydrationProperties::new())
            .unwrap();
        assert_eq!(loaded.version(), 3);
        assert_eq!(loaded.state(), &live_state);

        let stream = stream_name::<OrderAggregate>(order.id());
        assert!(stream.starts_with("Order_ord_"));
        let types: Vec<String> = repo
            .store()
            .read_stream(&stream)
            .unwrap()
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(types, vec!["order.placed", "order.line_added", "order.shipped"]);
    }

    #[test]
    fn repository_over_configured_store() {
        let store = build_store(&StoreConfig::from_lookup(|_| None).unwrap()).unwrap();
        let mut registry = RehydrationRegistry::new();
        registry.register::<OrderAggregate>().unwrap();
        let repo = AggregateRepository::new(store, registry, DependencyContainer::default());

        let mut order = repo.create::<OrderAggregate>(None).unwrap();
        order.raise(placed("acme")).unwrap();
        assert_eq!(repo.save(&mut order).unwrap(), Some(1));
        assert_eq!(repo.store().store_type(), "InMemoryEventStore");

        let loaded = repo
            .load::<OrderAggregate>(order.id(), &HydrationProperties::new())
            .unwrap();
        assert_eq!(loaded.state().customer.as_deref(), Some("acme"));
    }

    #[test]
    fn aliasing_stream_names_never_reach_the_store() {
        let mut registry = RehydrationRegistry::new();
        registry.register::<OrderAggregate>().unwrap();
        assert!(matches!(
            registry.register::<LegacyOrderAggregate>(),
            Err(RegistryError::InvalidName { .. })
        ));
        let repo = AggregateRepository::new(
            InMemoryEventStore::new(),
            registry,
            DependencyContainer::default(),
        );

        let mut order = repo
            .create::<OrderAggregate>(Some(AggregateId::parse("x_y").unwrap()))
            .unwrap();
        order.raise(placed("acme")).unwrap();
        repo.save(&mut order).unwrap();

        // Unregistered, so it cannot write into the other aggregate's stream.
        let mut legacy = repo
            .create::<LegacyOrderAggregate>(Some(AggregateId::parse("y").unwrap()))
            .unwrap();
        assert_eq!(
            stream_name::<LegacyOrderAggregate>(legacy.id()),
            stream_name::<OrderAggregate>(order.id())
        );
        legacy.raise(placed("globex")).unwrap();
        let err = repo.save(&mut legacy).unwrap_err();
        assert!(matches!(err, RepositoryError::Registry(_)));

        let loaded = repo
            .load::<OrderAggregate>(order.id(), &HydrationProperties::new())
            .unwrap();
        assert_eq!(loaded.version(), 1);
        assert_eq!(loaded.state().customer.as_deref(), Some("acme"));
    }

    #[test]
    fn incremental_saves_continue_the_stream() {
        let repo = setup();
        let mut order = repo.create::<OrderAggregate>(None).unwrap();
        order.raise(placed("acme")).unwrap();
        repo.save(&mut order).unwrap();

        let mut reloaded = repo
            .load::<OrderAggregate>(order.id(), &HydrationProperties::new())
            .unwrap();
        reloaded.raise(line("bolt", 10)).unwrap();
        reloaded.raise(line("nut", 10)).unwrap();
        assert_eq!(repo.save(&mut reloaded).unwrap(), Some(3));

        let versions: Vec<u64> = repo
            .store()
            .read_stream(&stream_name::<OrderAggregate>(order.id()))
            .unwrap()
            .iter()
            .map(|e| e.version)
            .collect();
        assert_eq!(versions, vec![1, 2, 3]);
    }

    #[test]
    fn rejected_command_changes_nothing() {
        let repo = setup();
        let mut order = repo.create::<OrderAggregate>(None).unwrap();
        order.raise(placed("acme")).unwrap();

        let err = order.raise(OrderEvent::Shipped { at: Utc::now() }).unwrap_err();
        assert!(matches!(err, DomainError::ValidationFailed(_)));
        assert_eq!(order.version(), 1);
        assert_eq!(order.uncommitted_events().len(), 1);
        assert!(!order.state().shipped);
    }

    #[test]
    fn hydration_properties_seed_state_before_replay() {
        let repo = setup();
        let mut order = repo.create::<OrderAggregate>(None).unwrap();
        order.raise(placed("acme")).unwrap();
        repo.save(&mut order).unwrap();

        let properties = HydrationProperties::new().with("currency", "USD").unwrap();
        let loaded = repo.load::<OrderAggregate>(order.id(), &properties).unwrap();
        assert_eq!(loaded.state().currency, "USD");
        assert_eq!(loaded.state().customer.as_deref(), Some("acme"));

        let defaulted = repo
            .load::<OrderAggregate>(order.id(), &HydrationProperties::new())
            .unwrap();
        assert_eq!(defaulted.state().currency, "EUR");
    }

    #[test]
    fn concurrent_savers_exactly_one_wins() {
        let repo = setup();
        let id = AggregateId::parse("ord_race").unwrap();
        let mut order = repo.create::<OrderAggregate>(Some(id.clone())).unwrap();
        order.raise(placed("acme")).unwrap();
        for n in 0..4 {
            order.raise(line(&format!("sku-{n}"), 1)).unwrap();
        }
        assert_eq!(repo.save(&mut order).unwrap(), Some(5));

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = ["left", "right"]
            .into_iter()
            .map(|sku| {
                let repo = Arc::clone(&repo);
                let barrier = Arc::clone(&barrier);
                let id = id.clone();
                std::thread::spawn(move || {
                    let mut loaded = repo
                        .load::<OrderAggregate>(&id, &HydrationProperties::new())
                        .unwrap();
                    assert_eq!(loaded.committed_version(), Some(5));
                    loaded.raise(line(sku, 1)).unwrap();
                    barrier.wait();
                    repo.save(&mut loaded)
                })
            })
            .collect();

        let results: Vec<Result<Option<u64>, RepositoryError>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        let winners = results.iter().filter(|r| matches!(r, Ok(Some(6)))).count();
        assert_eq!(winners, 1);

        let loser = results.into_iter().find_map(Result::err).unwrap();
        assert!(loser.is_version_conflict());
        match loser {
            RepositoryError::Store(err) => assert_eq!(
                err.violation(),
                Some(ContiguityViolation::VersionCollision { next: 6, latest: 6 })
            ),
            other => panic!("unexpected error: {other:?}"),
        }

        let stored = repo
            .store()
            .read_stream(&stream_name::<OrderAggregate>(&id))
            .unwrap();
        assert_eq!(stored.len(), 6);
    }

    #[test]
    fn concurrent_raw_appends_on_one_stream() {
        let store = Arc::new(InMemoryEventStore::new());
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|n| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    let event = UncommittedEvent {
                        event_id: uuid::Uuid::now_v7(),
                        aggregate_id: AggregateId::parse("shared").unwrap(),
                        version: 1,
                        event_type: "order.placed".to_string(),
                        schema_version: 1,
                        occurred_at: Utc::now(),
                        payload: serde_json::json!({ "writer": n }),
                    };
                    barrier.wait();
                    store.append("Order_shared", None, vec![event])
                })
            })
            .collect();

        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            outcomes
                .iter()
                .filter_map(|r| r.as_ref().err())
                .all(|e| e.is_version_conflict())
        );
        assert_eq!(store.read_stream("Order_shared").unwrap().len(), 1);
    }
}
