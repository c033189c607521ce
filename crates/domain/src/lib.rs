//! Domain layer for the unit-of-work pipeline.
//!
//! This crate provides:
//! - `Aggregate` and `DomainEvent` traits
//! - `EventBuffer`, the per-instance queue of events waiting to be published
//! - Cart, order and catalog aggregates with their events and errors

pub mod aggregate;
pub mod cart;
pub mod catalog;
pub mod error;
pub mod order;
pub mod values;

pub use aggregate::{Aggregate, DomainEvent, EventBuffer};
pub use cart::{Cart, CartError, CartEvent};
pub use catalog::{CatalogError, Product, ProductEvent};
pub use common::AggregateId;
pub use error::DomainError;
pub use order::{Order, OrderError, OrderEvent, OrderStatus};
pub use store::Version;
pub use values::{CustomerId, LineItem, Money, ProductId};
