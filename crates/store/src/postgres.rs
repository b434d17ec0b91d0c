use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Money, OrderId, OwnerKey, UserId};
use domain::{Address, Cart, LineItem, LineKey, Order, OrderStatus, merge_lines};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{CartStore, OrderStore, Result, StatusChange, StoreError, UpsertMode};

/// Runs the database migrations for both stores.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}

const LINE_COLUMNS: &str = "product_id, variant_id, quantity, unit_price, stock_at_add, \
                            display_name, image_ref, refreshed_at";

fn to_db_quantity(quantity: u32) -> Result<i32> {
    i32::try_from(quantity)
        .map_err(|_| StoreError::Corrupt(format!("quantity {quantity} out of range")))
}

fn from_db_quantity(value: i32, column: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("negative {column}: {value}")))
}

/// The empty string stands for "no variant" in the key columns.
fn variant_column(variant: Option<&common::VariantId>) -> &str {
    variant.map(|v| v.as_str()).unwrap_or("")
}

/// PostgreSQL-backed cart store.
///
/// Every write runs in one transaction that first upserts the `carts` row,
/// so concurrent writers for the same user serialize on that row lock.
#[derive(Clone)]
pub struct PostgresCartStore {
    pool: PgPool,
}

impl PostgresCartStore {
    /// Creates a new PostgreSQL cart store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_line(row: &PgRow) -> Result<LineItem> {
        let variant: String = row.try_get("variant_id")?;
        let unit_price: Decimal = row.try_get("unit_price")?;

        Ok(LineItem {
            product_id: row.try_get::<String, _>("product_id")?.into(),
            variant_id: (!variant.is_empty()).then(|| variant.into()),
            quantity: from_db_quantity(row.try_get("quantity")?, "quantity")?,
            unit_price: Money::new(unit_price),
            stock_at_add: from_db_quantity(row.try_get("stock_at_add")?, "stock_at_add")?,
            display_name: row.try_get("display_name")?,
            image_ref: row.try_get("image_ref")?,
            refreshed_at: row.try_get("refreshed_at")?,
        })
    }

    async fn lock_cart(
        tx: &mut Transaction<'_, Postgres>,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO carts (user_id, schema_version, last_synced_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id) DO UPDATE SET last_synced_at = EXCLUDED.last_synced_at
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(Cart::SCHEMA_VERSION)
        .bind(now)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Locks the `carts` row if there is one, without creating it.
    async fn lock_existing_cart(tx: &mut Transaction<'_, Postgres>, user_id: UserId) -> Result<()> {
        sqlx::query("SELECT 1 FROM carts WHERE user_id = $1 FOR UPDATE")
            .bind(user_id.as_uuid())
            .fetch_optional(&mut **tx)
            .await?;
        Ok(())
    }

    async fn lines_for_update(
        tx: &mut Transaction<'_, Postgres>,
        user_id: UserId,
    ) -> Result<Vec<LineItem>> {
        let rows = sqlx::query(&format!(
            "SELECT {LINE_COLUMNS} FROM cart_lines WHERE user_id = $1 \
             ORDER BY line_no ASC FOR UPDATE"
        ))
        .bind(user_id.as_uuid())
        .fetch_all(&mut **tx)
        .await?;

        rows.iter().map(Self::row_to_line).collect()
    }

    async fn write_lines(
        tx: &mut Transaction<'_, Postgres>,
        user_id: UserId,
        cart: &Cart,
    ) -> Result<()> {
        sqlx::query("DELETE FROM cart_lines WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .execute(&mut **tx)
            .await?;

        for line in cart.lines() {
            Self::insert_line(tx, user_id, line).await?;
        }
        Ok(())
    }

    async fn insert_line(
        tx: &mut Transaction<'_, Postgres>,
        user_id: UserId,
        line: &LineItem,
    ) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO cart_lines (user_id, {LINE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        ))
        .bind(user_id.as_uuid())
        .bind(line.product_id.as_str())
        .bind(variant_column(line.variant_id.as_ref()))
        .bind(to_db_quantity(line.quantity)?)
        .bind(line.unit_price.amount())
        .bind(to_db_quantity(line.stock_at_add)?)
        .bind(&line.display_name)
        .bind(&line.image_ref)
        .bind(line.refreshed_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CartStore for PostgresCartStore {
    async fn load(&self, user_id: UserId) -> Result<Option<Cart>> {
        let header = sqlx::query("SELECT last_synced_at FROM carts WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        let Some(header) = header else {
            return Ok(None);
        };
        let last_synced_at: DateTime<Utc> = header.try_get("last_synced_at")?;

        let rows = sqlx::query(&format!(
            "SELECT {LINE_COLUMNS} FROM cart_lines WHERE user_id = $1 ORDER BY line_no ASC"
        ))
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        let lines = rows
            .iter()
            .map(Self::row_to_line)
            .collect::<Result<Vec<_>>>()?;

        Cart::from_lines(OwnerKey::user(user_id), lines, last_synced_at)
            .map(Some)
            .map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    async fn replace_all(&self, user_id: UserId, lines: &[LineItem]) -> Result<Cart> {
        let now = Utc::now();
        let cart = Cart::from_lines(OwnerKey::user(user_id), lines.iter().cloned(), now)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let mut tx = self.pool.begin().await?;
        Self::lock_cart(&mut tx, user_id, now).await?;
        Self::write_lines(&mut tx, user_id, &cart).await?;

        tx.commit().await?;
        Ok(cart)
    }

    async fn merge_guest_lines(&self, user_id: UserId, guest: &[LineItem]) -> Result<Cart> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        Self::lock_cart(&mut tx, user_id, now).await?;

        let existing = Self::lines_for_update(&mut tx, user_id).await?;
        let merged = merge_lines(existing, guest.to_vec());
        let cart = Cart::from_lines(OwnerKey::user(user_id), merged, now)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        Self::write_lines(&mut tx, user_id, &cart).await?;

        tx.commit().await?;
        Ok(cart)
    }

    async fn upsert_line(
        &self,
        user_id: UserId,
        line: &LineItem,
        mode: UpsertMode,
    ) -> Result<LineItem> {
        let quantity_update = match mode {
            UpsertMode::Increment => "cart_lines.quantity + EXCLUDED.quantity",
            UpsertMode::Replace => "EXCLUDED.quantity",
        };

        let mut tx = self.pool.begin().await?;
        Self::lock_cart(&mut tx, user_id, Utc::now()).await?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO cart_lines (user_id, {LINE_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (user_id, product_id, variant_id) DO UPDATE SET
                quantity = {quantity_update},
                unit_price = EXCLUDED.unit_price,
                stock_at_add = EXCLUDED.stock_at_add,
                display_name = EXCLUDED.display_name,
                image_ref = EXCLUDED.image_ref,
                refreshed_at = EXCLUDED.refreshed_at
            RETURNING {LINE_COLUMNS}
            "#
        ))
        .bind(user_id.as_uuid())
        .bind(line.product_id.as_str())
        .bind(variant_column(line.variant_id.as_ref()))
        .bind(to_db_quantity(line.quantity)?)
        .bind(line.unit_price.amount())
        .bind(to_db_quantity(line.stock_at_add)?)
        .bind(&line.display_name)
        .bind(&line.image_ref)
        .bind(line.refreshed_at)
        .fetch_one(&mut *tx)
        .await?;

        let stored = Self::row_to_line(&row)?;
        tx.commit().await?;
        Ok(stored)
    }

    async fn remove_line(&self, user_id: UserId, key: &LineKey) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        Self::lock_existing_cart(&mut tx, user_id).await?;

        let result = sqlx::query(
            "DELETE FROM cart_lines WHERE user_id = $1 AND product_id = $2 AND variant_id = $3",
        )
        .bind(user_id.as_uuid())
        .bind(key.product_id.as_str())
        .bind(variant_column(key.variant_id.as_ref()))
        .execute(&mut *tx)
        .await?;

        let removed = result.rows_affected() > 0;
        if removed {
            sqlx::query("UPDATE carts SET last_synced_at = $2 WHERE user_id = $1")
                .bind(user_id.as_uuid())
                .bind(Utc::now())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(removed)
    }

    async fn clear(&self, user_id: UserId) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::lock_existing_cart(&mut tx, user_id).await?;

        sqlx::query("DELETE FROM cart_lines WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE carts SET last_synced_at = $2 WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

/// PostgreSQL-backed order store.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

const ORDER_SELECT: &str = r#"
    SELECT o.id, o.order_number, o.owner_key, o.status, o.total, o.lines,
           o.shipping_address, o.payment_reference, o.customer_email,
           o.cancel_reason, o.created_at, o.updated_at,
           b.address AS billing_address
    FROM orders o
    LEFT JOIN order_billing_addresses b ON b.order_id = o.id
"#;

impl PostgresOrderStore {
    /// Creates a new PostgreSQL order store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        let status: String = row.try_get("status")?;
        let total: Decimal = row.try_get("total")?;
        let billing: Option<serde_json::Value> = row.try_get("billing_address")?;

        Ok(Order {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            order_number: row.try_get("order_number")?,
            owner_key: serde_json::from_value(row.try_get("owner_key")?)?,
            status: status
                .parse::<OrderStatus>()
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            total: Money::new(total),
            lines: serde_json::from_value(row.try_get("lines")?)?,
            shipping_address: serde_json::from_value(row.try_get("shipping_address")?)?,
            billing_address: billing.map(serde_json::from_value).transpose()?,
            payment_reference: row.try_get("payment_reference")?,
            customer_email: row.try_get("customer_email")?,
            cancel_reason: row.try_get("cancel_reason")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn insert(&self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, order_number, owner_key, status, total, lines,
                                shipping_address, payment_reference, customer_email,
                                cancel_reason, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(&order.order_number)
        .bind(serde_json::to_value(&order.owner_key)?)
        .bind(order.status.as_str())
        .bind(order.total.amount())
        .bind(serde_json::to_value(&order.lines)?)
        .bind(serde_json::to_value(&order.shipping_address)?)
        .bind(&order.payment_reference)
        .bind(&order.customer_email)
        .bind(&order.cancel_reason)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("unique_payment_reference")
            {
                return StoreError::DuplicatePaymentReference(order.payment_reference.clone());
            }
            StoreError::Database(e)
        })?;

        if let Some(billing) = &order.billing_address {
            self.upsert_billing_address(order.id, billing).await?;
        }
        Ok(())
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("{ORDER_SELECT} WHERE o.id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn find_by_payment_reference(&self, reference: &str) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("{ORDER_SELECT} WHERE o.payment_reference = $1"))
            .bind(reference)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn compare_and_set_status(
        &self,
        id: OrderId,
        expected: OrderStatus,
        next: OrderStatus,
        change: StatusChange<'_>,
    ) -> Result<bool> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $3, cancel_reason = COALESCE($4, cancel_reason), updated_at = $5
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id.as_uuid())
        .bind(expected.as_str())
        .bind(next.as_str())
        .bind(change.reason)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        if let Some(billing) = change.billing {
            write_billing(&mut tx, id, billing, now).await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn upsert_billing_address(&self, id: OrderId, address: &Address) -> Result<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        write_billing(&mut tx, id, address, now).await?;
        sqlx::query("UPDATE orders SET updated_at = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

async fn write_billing(
    tx: &mut Transaction<'_, Postgres>,
    id: OrderId,
    address: &Address,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO order_billing_addresses (order_id, address, updated_at)
        VALUES ($1, $2, $3)
        ON CONFLICT (order_id) DO UPDATE SET
            address = EXCLUDED.address,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(id.as_uuid())
    .bind(serde_json::to_value(address)?)
    .bind(now)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
