//! Postgres-backed order store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | OrderStoreError |
//! |------------|----------------------|-----------------|
//! | Database (unique violation on `orders_tenant_reference_key`) | `23505` | `DuplicateReference` |
//! | Database (unique violation on the primary key) | `23505` | `AlreadyExists` |
//! | Anything else (pool closed, network, decode) | any | `Storage` |

use std::sync::Arc;

use sqlx::{PgPool, Row};
use tracing::instrument;

use storefront_core::TenantId;
use storefront_orders::{Order, OrderId};

use super::store::{OrderStore, OrderStoreError};

const REFERENCE_CONSTRAINT: &str = "orders_tenant_reference_key";

/// Orders table plus a per-(tenant, year) counter table.
///
/// The whole aggregate is kept as a JSONB document; reference, status and
/// timestamps are duplicated into columns for lookups and the uniqueness
/// constraint.
#[derive(Debug, Clone)]
pub struct PostgresOrderStore {
    pool: Arc<PgPool>,
}

impl PostgresOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect and apply the bundled migrations.
    pub async fn connect(database_url: &str) -> Result<Self, OrderStoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), OrderStoreError> {
        sqlx::migrate!("./migrations")
            .run(&*self.pool)
            .await
            .map_err(|e| OrderStoreError::Storage(format!("migration failed: {e}")))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl OrderStore for PostgresOrderStore {
    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn count_for_year(&self, tenant_id: TenantId, year: i32) -> Result<u64, OrderStoreError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n
            FROM orders
            WHERE tenant_id = $1 AND reference_year = $2
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(year)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_for_year", e))?;

        let n: i64 = row.try_get("n").map_err(|e| map_sqlx_error("count_for_year", e))?;
        Ok(n.max(0) as u64)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn next_sequence(&self, tenant_id: TenantId, year: i32) -> Result<u64, OrderStoreError> {
        // The first allocation of a year starts after any reference already stored.
        let row = sqlx::query(
            r#"
            INSERT INTO order_reference_counters (tenant_id, year, last_sequence)
            VALUES (
                $1,
                $2,
                (SELECT COALESCE(MAX(reference_sequence), 0) + 1
                 FROM orders
                 WHERE tenant_id = $1 AND reference_year = $2)
            )
            ON CONFLICT (tenant_id, year)
            DO UPDATE SET last_sequence = order_reference_counters.last_sequence + 1
            RETURNING last_sequence
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(year)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("next_sequence", e))?;

        let seq: i64 = row
            .try_get("last_sequence")
            .map_err(|e| map_sqlx_error("next_sequence", e))?;
        Ok(seq.max(0) as u64)
    }

    #[instrument(skip(self, order), fields(order_id = %order.id_typed()), err)]
    async fn insert(&self, order: &Order) -> Result<(), OrderStoreError> {
        let row = OrderRow::from_order(order)?;

        sqlx::query(
            r#"
            INSERT INTO orders (
                tenant_id, order_id, reference, reference_year, reference_sequence,
                status, document, placed_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(row.tenant_id)
        .bind(row.order_id)
        .bind(&row.reference)
        .bind(row.reference_year)
        .bind(row.reference_sequence)
        .bind(&row.status)
        .bind(&row.document)
        .bind(row.placed_at)
        .bind(row.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| insert_error(e, order.id_typed(), &row.reference))?;

        Ok(())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, order_id = %order_id), err)]
    async fn get(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
    ) -> Result<Option<Order>, OrderStoreError> {
        let row = sqlx::query(
            r#"
            SELECT document
            FROM orders
            WHERE tenant_id = $1 AND order_id = $2
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(order_id.0.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get", e))?;

        row.map(|r| decode_document(&r)).transpose()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn list(&self, tenant_id: TenantId) -> Result<Vec<Order>, OrderStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT document
            FROM orders
            WHERE tenant_id = $1
            ORDER BY placed_at ASC, reference_year ASC, reference_sequence ASC
            "#,
        )
        .bind(tenant_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list", e))?;

        rows.iter().map(decode_document).collect()
    }

    #[instrument(skip(self, order), fields(order_id = %order.id_typed()), err)]
    async fn update(&self, order: &Order) -> Result<(), OrderStoreError> {
        let row = OrderRow::from_order(order)?;

        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $3, document = $4, updated_at = $5
            WHERE tenant_id = $1 AND order_id = $2
            "#,
        )
        .bind(row.tenant_id)
        .bind(row.order_id)
        .bind(&row.status)
        .bind(&row.document)
        .bind(row.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update", e))?;

        if result.rows_affected() == 0 {
            return Err(OrderStoreError::NotFound(order.id_typed()));
        }
        Ok(())
    }
}

/// Column values for one order.
#[derive(Debug)]
struct OrderRow {
    tenant_id: uuid::Uuid,
    order_id: uuid::Uuid,
    reference: String,
    reference_year: i32,
    reference_sequence: i64,
    status: String,
    document: serde_json::Value,
    placed_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl OrderRow {
    fn from_order(order: &Order) -> Result<Self, OrderStoreError> {
        let tenant_id = order.tenant_id().ok_or(OrderStoreError::NotPlaced)?;
        let reference = order.reference().ok_or(OrderStoreError::NotPlaced)?;
        let placed_at = order.placed_at().ok_or(OrderStoreError::NotPlaced)?;
        let document = serde_json::to_value(order)
            .map_err(|e| OrderStoreError::Storage(format!("failed to encode order: {e}")))?;

        Ok(Self {
            tenant_id: *tenant_id.as_uuid(),
            order_id: *order.id_typed().0.as_uuid(),
            reference: reference.to_string(),
            reference_year: reference.year(),
            reference_sequence: i64::try_from(reference.sequence()).map_err(|_| {
                OrderStoreError::Storage(format!("reference sequence out of range: {reference}"))
            })?,
            status: order.status().as_str().to_string(),
            document,
            placed_at,
            updated_at: order.updated_at().unwrap_or(placed_at),
        })
    }
}

fn decode_document(row: &sqlx::postgres::PgRow) -> Result<Order, OrderStoreError> {
    let document: serde_json::Value = row
        .try_get("document")
        .map_err(|e| map_sqlx_error("decode", e))?;
    serde_json::from_value(document)
        .map_err(|e| OrderStoreError::Storage(format!("failed to decode order document: {e}")))
}

fn insert_error(err: sqlx::Error, order_id: OrderId, reference: &str) -> OrderStoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            return if db_err.constraint() == Some(REFERENCE_CONSTRAINT) {
                OrderStoreError::DuplicateReference(reference.to_string())
            } else {
                OrderStoreError::AlreadyExists(order_id)
            };
        }
    }
    map_sqlx_error("insert", err)
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> OrderStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            OrderStoreError::Storage(format!("database error in {}: {}", operation, db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            OrderStoreError::Storage(format!("connection pool closed in {}", operation))
        }
        _ => OrderStoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}
