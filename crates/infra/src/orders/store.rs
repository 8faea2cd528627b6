//! Order persistence port and its in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use storefront_core::TenantId;
use storefront_orders::{Order, OrderId};

/// Order store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderStoreError {
    #[error("order not found: {0}")]
    NotFound(OrderId),
    #[error("order already exists: {0}")]
    AlreadyExists(OrderId),
    /// Another order of the same tenant already holds this reference.
    #[error("order reference already taken: {0}")]
    DuplicateReference(String),
    #[error("order has not been placed")]
    NotPlaced,
    #[error("storage error: {0}")]
    Storage(String),
}

/// Tenant-scoped order persistence.
///
/// References are unique per tenant. `next_sequence` is the atomic per-year
/// allocator; `count_for_year` is the plain count used by the count-then-format
/// strategy, whose races surface as `DuplicateReference` on insert.
#[async_trait::async_trait]
pub trait OrderStore: Send + Sync {
    /// Number of orders of `tenant_id` whose reference belongs to `year`.
    async fn count_for_year(&self, tenant_id: TenantId, year: i32) -> Result<u64, OrderStoreError>;

    /// Atomically allocate the next reference sequence (1-based) for the year.
    async fn next_sequence(&self, tenant_id: TenantId, year: i32) -> Result<u64, OrderStoreError>;

    async fn insert(&self, order: &Order) -> Result<(), OrderStoreError>;

    async fn get(&self, tenant_id: TenantId, order_id: OrderId)
    -> Result<Option<Order>, OrderStoreError>;

    /// Orders of a tenant, oldest first.
    async fn list(&self, tenant_id: TenantId) -> Result<Vec<Order>, OrderStoreError>;

    async fn update(&self, order: &Order) -> Result<(), OrderStoreError>;
}

#[async_trait::async_trait]
impl<S> OrderStore for Arc<S>
where
    S: OrderStore + ?Sized,
{
    async fn count_for_year(&self, tenant_id: TenantId, year: i32) -> Result<u64, OrderStoreError> {
        (**self).count_for_year(tenant_id, year).await
    }

    async fn next_sequence(&self, tenant_id: TenantId, year: i32) -> Result<u64, OrderStoreError> {
        (**self).next_sequence(tenant_id, year).await
    }

    async fn insert(&self, order: &Order) -> Result<(), OrderStoreError> {
        (**self).insert(order).await
    }

    async fn get(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
    ) -> Result<Option<Order>, OrderStoreError> {
        (**self).get(tenant_id, order_id).await
    }

    async fn list(&self, tenant_id: TenantId) -> Result<Vec<Order>, OrderStoreError> {
        (**self).list(tenant_id).await
    }

    async fn update(&self, order: &Order) -> Result<(), OrderStoreError> {
        (**self).update(order).await
    }
}

/// In-memory order store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryOrderStore {
    orders: RwLock<HashMap<(TenantId, OrderId), Order>>,
    counters: RwLock<HashMap<(TenantId, i32), u64>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn orders_read(
        &self,
    ) -> Result<RwLockReadGuard<'_, HashMap<(TenantId, OrderId), Order>>, OrderStoreError> {
        self.orders.read().map_err(|_| poisoned())
    }

    fn orders_write(
        &self,
    ) -> Result<RwLockWriteGuard<'_, HashMap<(TenantId, OrderId), Order>>, OrderStoreError> {
        self.orders.write().map_err(|_| poisoned())
    }

    fn max_sequence(orders: &HashMap<(TenantId, OrderId), Order>, tenant_id: TenantId, year: i32) -> u64 {
        orders
            .iter()
            .filter(|((t, _), _)| *t == tenant_id)
            .filter_map(|(_, o)| o.reference())
            .filter(|r| r.year() == year)
            .map(|r| u64::try_from(r.sequence()).unwrap_or(u64::MAX))
            .max()
            .unwrap_or(0)
    }
}

fn poisoned() -> OrderStoreError {
    OrderStoreError::Storage("order store lock poisoned".to_string())
}

fn placed_tenant(order: &Order) -> Result<TenantId, OrderStoreError> {
    order.tenant_id().ok_or(OrderStoreError::NotPlaced)
}

#[async_trait::async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn count_for_year(&self, tenant_id: TenantId, year: i32) -> Result<u64, OrderStoreError> {
        let orders = self.orders_read()?;
        let count = orders
            .iter()
            .filter(|((t, _), _)| *t == tenant_id)
            .filter(|(_, o)| o.reference().is_some_and(|r| r.year() == year))
            .count();
        Ok(count as u64)
    }

    async fn next_sequence(&self, tenant_id: TenantId, year: i32) -> Result<u64, OrderStoreError> {
        // A fresh counter starts from the highest reference already stored.
        let orders = self.orders_read()?;
        let mut counters = self.counters.write().map_err(|_| poisoned())?;

        let last = counters
            .entry((tenant_id, year))
            .or_insert_with(|| Self::max_sequence(&orders, tenant_id, year));
        *last = last
            .checked_add(1)
            .ok_or_else(|| OrderStoreError::Storage(format!("reference counter exhausted for {year}")))?;
        Ok(*last)
    }

    async fn insert(&self, order: &Order) -> Result<(), OrderStoreError> {
        let tenant_id = placed_tenant(order)?;
        let reference = order.reference().ok_or(OrderStoreError::NotPlaced)?;

        let mut orders = self.orders_write()?;
        let key = (tenant_id, order.id_typed());
        if orders.contains_key(&key) {
            return Err(OrderStoreError::AlreadyExists(order.id_typed()));
        }
        let taken = orders
            .iter()
            .any(|((t, _), o)| *t == tenant_id && o.reference() == Some(reference));
        if taken {
            return Err(OrderStoreError::DuplicateReference(reference.to_string()));
        }

        orders.insert(key, order.clone());
        Ok(())
    }

    async fn get(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
    ) -> Result<Option<Order>, OrderStoreError> {
        Ok(self.orders_read()?.get(&(tenant_id, order_id)).cloned())
    }

    async fn list(&self, tenant_id: TenantId) -> Result<Vec<Order>, OrderStoreError> {
        let orders = self.orders_read()?;
        let mut result: Vec<_> = orders
            .iter()
            .filter(|((t, _), _)| *t == tenant_id)
            .map(|(_, o)| o.clone())
            .collect();
        result.sort_by(|a, b| {
            a.placed_at()
                .cmp(&b.placed_at())
                .then_with(|| a.reference().map(|r| r.sequence()).cmp(&b.reference().map(|r| r.sequence())))
        });
        Ok(result)
    }

    async fn update(&self, order: &Order) -> Result<(), OrderStoreError> {
        let tenant_id = placed_tenant(order)?;
        let mut orders = self.orders_write()?;
        let slot = orders
            .get_mut(&(tenant_id, order.id_typed()))
            .ok_or(OrderStoreError::NotFound(order.id_typed()))?;
        *slot = order.clone();
        Ok(())
    }
}
