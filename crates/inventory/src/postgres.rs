use async_trait::async_trait;
use common::ProductId;
use sqlx::{PgExecutor, PgPool, Row, postgres::PgRow};

use crate::ledger::{self, Hold, HoldKey, HoldStatus, InventoryLedger, InventoryRecord, StockCheck};
use crate::{LedgerError, Result};

const RETURNING: &str = "RETURNING product_id, available, reserved, threshold";

const RESERVE: &str = "available = available - $2, reserved = reserved + $2, updated_at = NOW() \
                       WHERE product_id = $1 AND available >= $2";
const RELEASE: &str = "available = available + $2, reserved = reserved - $2, updated_at = NOW() \
                       WHERE product_id = $1 AND reserved >= $2";
const CONFIRM: &str = "reserved = reserved - $2, updated_at = NOW() \
                       WHERE product_id = $1 AND reserved >= $2";

/// How a confirm or release found its hold.
enum Settled {
    Applied(InventoryRecord),
    AlreadyDone(InventoryRecord),
    Missing,
}

/// PostgreSQL-backed ledger.
///
/// Every mutation is one conditional `UPDATE`; the `WHERE` clause carries the
/// precondition and the table's `CHECK` constraints back it up. A zero-row
/// update is classified afterwards by reading the product's row.
///
/// Hold-keyed calls run the `inventory_holds` row change and the counter
/// update in one transaction. The hold's primary key serializes repeats of
/// the same call.
#[derive(Clone)]
pub struct PostgresInventoryLedger {
    pool: PgPool,
}

impl PostgresInventoryLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_record(row: PgRow) -> Result<InventoryRecord> {
        Ok(InventoryRecord {
            product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
            available: to_u32(row.try_get("available")?),
            reserved: to_u32(row.try_get("reserved")?),
            threshold: to_u32(row.try_get("threshold")?),
        })
    }

    async fn conditional_update<'e, E>(
        executor: E,
        set_and_guard: &str,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<Option<InventoryRecord>>
    where
        E: PgExecutor<'e>,
    {
        let sql = format!("UPDATE inventory SET {set_and_guard} {RETURNING}");
        let row = sqlx::query(&sql)
            .bind(product_id.as_str())
            .bind(i64::from(quantity))
            .fetch_optional(executor)
            .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn fetch_hold<'e, E>(executor: E, key: &HoldKey) -> Result<Option<Hold>>
    where
        E: PgExecutor<'e>,
    {
        let row = sqlx::query(
            "SELECT quantity, status FROM inventory_holds WHERE order_id = $1 AND product_id = $2",
        )
        .bind(key.order_id.as_uuid())
        .bind(key.product_id.as_str())
        .fetch_optional(executor)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let status: String = row.try_get("status")?;
        let status = status
            .parse::<HoldStatus>()
            .map_err(|detail| LedgerError::CorruptHold {
                key: key.clone(),
                detail,
            })?;

        Ok(Some(Hold {
            key: key.clone(),
            quantity: to_u32(row.try_get("quantity")?),
            status,
        }))
    }

    async fn current(&self, product_id: &ProductId) -> Result<InventoryRecord> {
        self.record(product_id)
            .await?
            .ok_or_else(|| LedgerError::UnknownProduct {
                product_id: product_id.clone(),
            })
    }

    /// Builds the error for an update that matched no row.
    async fn classify_miss(
        &self,
        product_id: &ProductId,
        quantity: u32,
        operation: &'static str,
    ) -> LedgerError {
        let record = match self.record(product_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                return LedgerError::UnknownProduct {
                    product_id: product_id.clone(),
                };
            }
            Err(err) => return err,
        };

        if operation == "reserve" {
            LedgerError::InsufficientStock {
                product_id: product_id.clone(),
                requested: quantity,
                available: record.available,
            }
        } else {
            LedgerError::InvariantViolation {
                product_id: product_id.clone(),
                operation,
                requested: quantity,
                reserved: record.reserved,
            }
        }
    }

    async fn apply(
        &self,
        set_and_guard: &str,
        product_id: &ProductId,
        quantity: u32,
        operation: &'static str,
    ) -> Result<InventoryRecord> {
        ledger::ensure_positive(product_id, quantity)?;

        match Self::conditional_update(&self.pool, set_and_guard, product_id, quantity).await? {
            Some(record) => Ok(record),
            None => Err(self.classify_miss(product_id, quantity, operation).await),
        }
    }

    async fn reserve_hold_now(&self, key: &HoldKey, quantity: u32) -> Result<InventoryRecord> {
        ledger::ensure_positive(&key.product_id, quantity)?;
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            r#"
            INSERT INTO inventory_holds (order_id, product_id, quantity, status)
            VALUES ($1, $2, $3, 'reserved')
            ON CONFLICT (order_id, product_id) DO NOTHING
            "#,
        )
        .bind(key.order_id.as_uuid())
        .bind(key.product_id.as_str())
        .bind(i64::from(quantity))
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        if !claimed {
            let hold = Self::fetch_hold(&mut *tx, key).await?;
            tx.rollback().await?;
            return match hold {
                Some(hold) if hold.status == HoldStatus::Reserved => {
                    tracing::debug!(hold = %key, "Hold already reserved");
                    self.current(&key.product_id).await
                }
                Some(hold) => Err(ledger::hold_conflict(key, "reserve", hold.status)),
                None => Err(LedgerError::UnknownHold { key: key.clone() }),
            };
        }

        let updated = Self::conditional_update(&mut *tx, RESERVE, &key.product_id, quantity).await?;
        let result = match updated {
            Some(record) => tx.commit().await.map(|()| record).map_err(LedgerError::from),
            None => {
                tx.rollback().await?;
                Err(self.classify_miss(&key.product_id, quantity, "reserve").await)
            }
        };
        ledger::observe_reserve(&key.product_id, quantity, &result);
        result
    }

    /// Moves a reserved hold to `target` together with its counter update.
    async fn settle_hold(
        &self,
        key: &HoldKey,
        target: HoldStatus,
        set_and_guard: &str,
        operation: &'static str,
    ) -> Result<Settled> {
        let mut tx = self.pool.begin().await?;

        let quantity: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE inventory_holds SET status = $3, updated_at = NOW()
            WHERE order_id = $1 AND product_id = $2 AND status = 'reserved'
            RETURNING quantity
            "#,
        )
        .bind(key.order_id.as_uuid())
        .bind(key.product_id.as_str())
        .bind(target.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(quantity) = quantity.map(to_u32) else {
            let hold = Self::fetch_hold(&mut *tx, key).await?;
            tx.rollback().await?;
            return match hold {
                None => Ok(Settled::Missing),
                Some(hold) if hold.status == target => {
                    Ok(Settled::AlreadyDone(self.current(&key.product_id).await?))
                }
                Some(hold) => Err(ledger::hold_conflict(key, operation, hold.status)),
            };
        };

        let updated =
            Self::conditional_update(&mut *tx, set_and_guard, &key.product_id, quantity).await?;
        match updated {
            Some(record) => {
                tx.commit().await?;
                Ok(Settled::Applied(record))
            }
            None => {
                tx.rollback().await?;
                Err(self.classify_miss(&key.product_id, quantity, operation).await)
            }
        }
    }
}

/// Columns are `CHECK (>= 0)` and only ever written from `u32` amounts.
fn to_u32(value: i64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

#[async_trait]
impl InventoryLedger for PostgresInventoryLedger {
    #[tracing::instrument(skip(self), fields(product_id = %product_id))]
    async fn reserve(&self, product_id: &ProductId, quantity: u32) -> Result<InventoryRecord> {
        let result = self.apply(RESERVE, product_id, quantity, "reserve").await;
        ledger::observe_reserve(product_id, quantity, &result);
        result
    }

    #[tracing::instrument(skip(self), fields(product_id = %product_id))]
    async fn release(&self, product_id: &ProductId, quantity: u32) -> Result<InventoryRecord> {
        let result = self.apply(RELEASE, product_id, quantity, "release").await;
        ledger::observe_release(&result);
        result
    }

    #[tracing::instrument(skip(self), fields(product_id = %product_id))]
    async fn confirm(&self, product_id: &ProductId, quantity: u32) -> Result<InventoryRecord> {
        let result = self.apply(CONFIRM, product_id, quantity, "confirm").await;
        ledger::observe_confirm(&result);
        result
    }

    #[tracing::instrument(skip(self), fields(hold = %key))]
    async fn reserve_hold(&self, key: &HoldKey, quantity: u32) -> Result<InventoryRecord> {
        self.reserve_hold_now(key, quantity).await
    }

    #[tracing::instrument(skip(self), fields(hold = %key))]
    async fn confirm_hold(&self, key: &HoldKey) -> Result<InventoryRecord> {
        match self
            .settle_hold(key, HoldStatus::Confirmed, CONFIRM, "confirm")
            .await?
        {
            Settled::Applied(record) => {
                ledger::observe_confirm(&Ok(record.clone()));
                Ok(record)
            }
            Settled::AlreadyDone(record) => Ok(record),
            Settled::Missing => Err(LedgerError::UnknownHold { key: key.clone() }),
        }
    }

    #[tracing::instrument(skip(self), fields(hold = %key))]
    async fn release_hold(&self, key: &HoldKey) -> Result<Option<InventoryRecord>> {
        match self
            .settle_hold(key, HoldStatus::Released, RELEASE, "release")
            .await?
        {
            Settled::Applied(record) => {
                ledger::observe_release(&Ok(record.clone()));
                Ok(Some(record))
            }
            Settled::AlreadyDone(record) => Ok(Some(record)),
            Settled::Missing => Ok(None),
        }
    }

    async fn hold(&self, key: &HoldKey) -> Result<Option<Hold>> {
        Self::fetch_hold(&self.pool, key).await
    }

    async fn check_stock(&self, product_id: &ProductId, quantity: u32) -> Result<StockCheck> {
        let record = self.current(product_id).await?;
        Ok(StockCheck::from_record(&record, quantity))
    }

    async fn register_product(
        &self,
        product_id: &ProductId,
        available: u32,
        threshold: u32,
    ) -> Result<InventoryRecord> {
        sqlx::query(
            r#"
            INSERT INTO inventory (product_id, available, reserved, threshold)
            VALUES ($1, $2, 0, $3)
            ON CONFLICT (product_id) DO NOTHING
            "#,
        )
        .bind(product_id.as_str())
        .bind(i64::from(available))
        .bind(i64::from(threshold))
        .execute(&self.pool)
        .await?;

        self.current(product_id).await
    }

    async fn record(&self, product_id: &ProductId) -> Result<Option<InventoryRecord>> {
        let row = sqlx::query(
            "SELECT product_id, available, reserved, threshold FROM inventory WHERE product_id = $1",
        )
        .bind(product_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }
}
