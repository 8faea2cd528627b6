//! Order persistence and placement.

pub mod placement;
pub mod postgres;
pub mod store;

pub use placement::{
    DEFAULT_MAX_CONFLICT_RETRIES, NewOrder, OrderPlacement, PlacementError, ReferenceStrategy,
};
pub use postgres::PostgresOrderStore;
pub use store::{InMemoryOrderStore, OrderStore, OrderStoreError};
