//! Order placement: reference allocation, command execution, persistence.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Datelike, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use storefront_core::{Aggregate, AggregateId, Clock, DomainError, TenantId};
use storefront_orders::{
    ChangeStatus, CustomerInfo, NewOrderLine, Order, OrderCommand, OrderId, OrderReference,
    OrderStatus, PlaceOrder,
};

use super::store::{OrderStore, OrderStoreError};

/// How a new order's `existing_count_for_year` is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceStrategy {
    /// Per-(tenant, year) counter incremented atomically by the store.
    #[default]
    AtomicCounter,
    /// Count the year's orders, then format. Two concurrent placements can
    /// compute the same reference; the loser hits the unique constraint and
    /// is retried.
    YearCount,
}

impl ReferenceStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceStrategy::AtomicCounter => "atomic",
            ReferenceStrategy::YearCount => "year_count",
        }
    }
}

impl FromStr for ReferenceStrategy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "atomic" | "atomic_counter" => Ok(Self::AtomicCounter),
            "year_count" | "count" => Ok(Self::YearCount),
            other => Err(DomainError::validation(format!(
                "unknown reference strategy: {other}"
            ))),
        }
    }
}

/// Order as submitted by a caller, before a reference is assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    #[serde(default)]
    pub status: Option<OrderStatus>,
    pub customer: CustomerInfo,
    pub lines: Vec<NewOrderLine>,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlacementError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Store(#[from] OrderStoreError),
    /// Every attempt collided with a concurrently placed order.
    #[error("could not allocate a unique order reference after {attempts} attempts")]
    ReferenceConflict { attempts: u32 },
}

pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 5;

/// Places orders and changes their status against an `OrderStore`.
///
/// The reference year is the calendar year at the business offset (UTC unless
/// set with [`OrderPlacement::with_business_offset`]) when the order is placed.
pub struct OrderPlacement<S> {
    store: S,
    clock: Arc<dyn Clock>,
    business_offset: FixedOffset,
    strategy: ReferenceStrategy,
    max_conflict_retries: u32,
}

impl<S: OrderStore> OrderPlacement<S> {
    pub fn new(store: S, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            business_offset: Utc.fix(),
            strategy: ReferenceStrategy::default(),
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
        }
    }

    pub fn with_strategy(mut self, strategy: ReferenceStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_business_offset(mut self, offset: FixedOffset) -> Self {
        self.business_offset = offset;
        self
    }

    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    pub fn strategy(&self) -> ReferenceStrategy {
        self.strategy
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn reference_year(&self, now: DateTime<Utc>) -> i32 {
        now.with_timezone(&self.business_offset).year()
    }

    async fn existing_count(&self, tenant_id: TenantId, year: i32) -> Result<u64, OrderStoreError> {
        match self.strategy {
            ReferenceStrategy::AtomicCounter => {
                let sequence = self.store.next_sequence(tenant_id, year).await?;
                Ok(sequence.saturating_sub(1))
            }
            ReferenceStrategy::YearCount => self.store.count_for_year(tenant_id, year).await,
        }
    }

    /// Place a new order, assigning the next `YYYY/NNNN` reference.
    #[instrument(skip(self, new_order), fields(tenant_id = %tenant_id, strategy = self.strategy.as_str()), err)]
    pub async fn place(&self, tenant_id: TenantId, new_order: NewOrder) -> Result<Order, PlacementError> {
        let attempts = self.max_conflict_retries + 1;

        // Rejected orders must not consume a sequence number.
        let now = self.clock.now();
        let draft_id = OrderId::new(AggregateId::new());
        Order::empty(draft_id).handle(&place_command(
            tenant_id,
            draft_id,
            OrderReference::next(self.reference_year(now), 0),
            &new_order,
            now,
        ))?;

        for attempt in 1..=attempts {
            let now = self.clock.now();
            let year = self.reference_year(now);
            let existing = self.existing_count(tenant_id, year).await?;
            let reference = OrderReference::next(year, existing);

            let order_id = OrderId::new(AggregateId::new());
            let mut order = Order::empty(order_id);
            order.execute(&place_command(tenant_id, order_id, reference.clone(), &new_order, now))?;

            match self.store.insert(&order).await {
                Ok(()) => {
                    info!(
                        order_id = %order_id,
                        reference = %reference,
                        status = %order.status(),
                        "order placed"
                    );
                    return Ok(order);
                }
                Err(OrderStoreError::DuplicateReference(taken)) => {
                    warn!(reference = %taken, attempt, "order reference taken, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(PlacementError::ReferenceConflict { attempts })
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, order_id = %order_id), err)]
    pub async fn change_status(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<Order, PlacementError> {
        let mut order = self.get(tenant_id, order_id).await?;
        let from = order.status();

        order.execute(&OrderCommand::ChangeStatus(ChangeStatus {
            tenant_id,
            order_id,
            status,
            occurred_at: self.clock.now(),
        }))?;
        self.store.update(&order).await?;

        info!(order_id = %order_id, from = %from, to = %status, "order status changed");
        Ok(order)
    }

    pub async fn get(&self, tenant_id: TenantId, order_id: OrderId) -> Result<Order, PlacementError> {
        self.store
            .get(tenant_id, order_id)
            .await?
            .ok_or(PlacementError::Domain(DomainError::not_found()))
    }

    pub async fn list(&self, tenant_id: TenantId) -> Result<Vec<Order>, PlacementError> {
        Ok(self.store.list(tenant_id).await?)
    }
}

fn place_command(
    tenant_id: TenantId,
    order_id: OrderId,
    reference: OrderReference,
    new_order: &NewOrder,
    now: DateTime<Utc>,
) -> OrderCommand {
    OrderCommand::PlaceOrder(PlaceOrder {
        tenant_id,
        order_id,
        reference,
        status: new_order.status,
        customer: new_order.customer.clone(),
        lines: new_order.lines.clone(),
        note: new_order.note.clone(),
        occurred_at: now,
    })
}
