use crate::domain::{Product, ProductId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Updated,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Updated => "updated",
        }
    }
}

/// Domain event emitted after a durable write.
///
/// `sequence` is assigned by the publisher and increases monotonically per
/// product; `(product_id, sequence)` identifies a delivery for idempotence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub kind: EventKind,
    pub product_id: ProductId,
    pub product: Product,
    pub sequence: u64,
    pub published_at: DateTime<Utc>,
}

impl DomainEvent {
    pub fn created(product: Product) -> Self {
        Self::new(EventKind::Created, product)
    }

    pub fn updated(product: Product) -> Self {
        Self::new(EventKind::Updated, product)
    }

    fn new(kind: EventKind, product: Product) -> Self {
        Self {
            kind,
            product_id: product.id.clone(),
            product,
            sequence: 0,
            published_at: Utc::now(),
        }
    }

    /// Key used to route every event of one product to the same partition.
    pub fn partition_key(&self) -> &str {
        self.product_id.as_str()
    }
}
