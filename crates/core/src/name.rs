//! Stable external names for aggregate types.
//!
//! The resolved name keys event streams, so it must survive refactors of the
//! Rust type name. An explicit `ENTITY_NAME` always wins.

use crate::aggregate::EventSourced;
use crate::id::AggregateId;

/// Suffixes trimmed from type names, checked in this order. At most one is removed.
pub const AGGREGATE_TYPE_SUFFIXES: [&str; 3] = ["Entity", "Aggregate", "Root"];

/// Joins the aggregate name and the identifier in a stream name.
pub const STREAM_NAME_SEPARATOR: char = '_';

/// Resolve a short type name into an aggregate name.
///
/// Strips the first matching suffix from [`AGGREGATE_TYPE_SUFFIXES`]. A name
/// that *is* a suffix (e.g. `"Root"`) resolves to the empty string, which
/// [`is_valid_aggregate_name`] rejects.
pub fn resolve_name(type_name: &str) -> String {
    AGGREGATE_TYPE_SUFFIXES
        .iter()
        .find_map(|suffix| type_name.strip_suffix(*suffix))
        .unwrap_or(type_name)
        .to_string()
}

/// Whether `name` can prefix stream names without two streams aliasing.
///
/// Identifiers may contain [`STREAM_NAME_SEPARATOR`], so the aggregate name
/// must not: the first separator in a stream name then always ends the name.
pub fn is_valid_aggregate_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(STREAM_NAME_SEPARATOR)
}

/// Short name of a Rust type: no module path, no generic arguments.
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let without_generics = full.split('<').next().unwrap_or(full);
    without_generics
        .rsplit("::")
        .next()
        .unwrap_or(without_generics)
}

/// Aggregate name for `S`: its `ENTITY_NAME` override, else the resolved type name.
pub fn aggregate_name<S: EventSourced>() -> String {
    match S::ENTITY_NAME {
        Some(name) => name.to_string(),
        None => resolve_name(short_type_name::<S>()),
    }
}

/// Event stream key for one aggregate instance.
pub fn stream_name<S: EventSourced>(id: &AggregateId) -> String {
    format!("{}{STREAM_NAME_SEPARATOR}{}", aggregate_name::<S>(), id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DomainResult;

    #[derive(Debug, Clone, Default)]
    struct OrderAggregate;

    #[derive(Debug, Clone, Default)]
    struct LegacyCustomerEntity;

    #[derive(Debug, Clone, Default)]
    struct Wrapper<T>(T);

    impl EventSourced for OrderAggregate {
        type Event = ();

        fn on_state_changed(&mut self, _event: &(), _is_reconstituting: bool) -> DomainResult<()> {
            Ok(())
        }
    }

    impl EventSourced for LegacyCustomerEntity {
        type Event = ();
        const ENTITY_NAME: Option<&'static str> = Some("Client");

        fn on_state_changed(&mut self, _event: &(), _is_reconstituting: bool) -> DomainResult<()> {
            Ok(())
        }
    }

    impl<T: Clone + Default + Send + core::fmt::Debug + 'static> EventSourced for Wrapper<T> {
        type Event = ();

        fn on_state_changed(&mut self, _event: &(), _is_reconstituting: bool) -> DomainResult<()> {
            Ok(())
        }
    }

    #[test]
    fn strips_known_suffixes() {
        assert_eq!(resolve_name("OrderAggregate"), "Order");
        assert_eq!(resolve_name("OrderRoot"), "Order");
        assert_eq!(resolve_name("OrderEntity"), "Order");
    }

    #[test]
    fn leaves_unsuffixed_names_alone() {
        assert_eq!(resolve_name("Order"), "Order");
        assert_eq!(resolve_name("Rooted"), "Rooted");
    }

    #[test]
    fn strips_at_most_once_in_declared_order() {
        // "Entity" is checked first, so "Root" inside the remainder survives.
        assert_eq!(resolve_name("OrderRootEntity"), "OrderRoot");
        assert_eq!(resolve_name("OrderAggregateRoot"), "OrderAggregate");
    }

    #[test]
    fn bare_suffix_resolves_to_empty() {
        assert_eq!(resolve_name("Root"), "");
        assert_eq!(resolve_name("Entity"), "");
        assert!(!is_valid_aggregate_name(&resolve_name("Aggregate")));
    }

    #[test]
    fn aggregate_names_cannot_contain_the_separator() {
        assert!(is_valid_aggregate_name("Order"));
        assert!(!is_valid_aggregate_name("Order_x"));
        assert!(!is_valid_aggregate_name(""));
    }

    #[test]
    fn short_type_name_drops_path_and_generics() {
        assert_eq!(short_type_name::<OrderAggregate>(), "OrderAggregate");
        assert_eq!(short_type_name::<Wrapper<OrderAggregate>>(), "Wrapper");
    }

    #[test]
    fn aggregate_name_uses_type_name_or_override() {
        assert_eq!(aggregate_name::<OrderAggregate>(), "Order");
        assert_eq!(aggregate_name::<LegacyCustomerEntity>(), "Client");
        assert_eq!(aggregate_name::<Wrapper<u8>>(), "Wrapper");
    }

    #[test]
    fn stream_name_joins_aggregate_name_and_id() {
        let id = AggregateId::parse("abc123").unwrap();
        assert_eq!(stream_name::<OrderAggregate>(&id), "Order_abc123");
    }
}
