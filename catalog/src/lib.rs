#![deny(clippy::all)]

pub mod consumer;
pub mod domain;
pub mod events;
pub mod health;
pub mod persistence;
pub mod ports;
pub mod products;
pub mod publisher;
pub mod retry;
pub mod telemetry;
pub mod validation;

#[cfg(test)]
pub(crate) mod test_support;

pub use domain::{Pagination, Product, ProductDraft, ProductId, ProductsList};
pub use events::{DomainEvent, EventKind};
pub use health::{Health, LifecycleState};
pub use products::{ProductOperations, ProductStore, StoreSettings};
pub use publisher::{EventPublisher, PublisherOptions};
pub use retry::RetryPolicy;
