//! Storefront orders domain module.
//!
//! Business rules for orders (placement, status lifecycle) and the
//! `YYYY/NNNN` reference format, implemented as deterministic domain logic
//! (no IO, no HTTP, no storage).

pub mod order;
pub mod reference;

pub use order::{
    ChangeStatus, CustomerInfo, NewOrderLine, Order, OrderCommand, OrderEvent, OrderId, OrderLine,
    OrderPlaced, OrderStatus, OrderStatusChanged, PlaceOrder,
};
pub use reference::{generate_reference, OrderReference};
