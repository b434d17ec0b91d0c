//! PostgreSQL integration tests
//!
//! These tests share one PostgreSQL container and truncate between tests,
//! so they are serialized.
//!
//! ```bash
//! cargo test -p store --test postgres_integration
//! ```

use std::sync::Arc;

use chrono::Utc;
use common::{Money, OwnerKey, UserId};
use domain::{Address, Cart, LineItem, LineKey, Order, OrderStatus};
use serial_test::serial;
use sqlx::PgPool;
use store::{
    CartStore, OrderStore, PostgresCartStore, PostgresOrderStore, StatusChange, StoreError,
    UpsertMode,
};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!("../../../migrations/001_create_cart_tables.sql"))
                .execute(&temp_pool)
                .await
                .unwrap();
            sqlx::raw_sql(include_str!("../../../migrations/002_create_order_tables.sql"))
                .execute(&temp_pool)
                .await
                .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_pool() -> PgPool {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE carts, cart_lines, orders, order_billing_addresses")
        .execute(&pool)
        .await
        .unwrap();

    pool
}

fn line(sku: &str, qty: u32, cents: i64) -> LineItem {
    LineItem::new(sku, format!("Product {sku}"), qty, Money::from_cents(cents))
}

fn order(reference: &str) -> Order {
    let mut cart = Cart::new(OwnerKey::user(UserId::new()));
    cart.add_line(line("SKU-1", 2, 1250)).unwrap();
    Order::from_cart(&cart, reference, Address::default(), "buyer@example.com", Utc::now())
        .unwrap()
}

#[tokio::test]
#[serial]
async fn test_load_unknown_user_returns_none() {
    let store = PostgresCartStore::new(get_pool().await);
    assert!(store.load(UserId::new()).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn test_replace_all_round_trips_lines_in_order() {
    let store = PostgresCartStore::new(get_pool().await);
    let user = UserId::new();

    let lines = vec![
        line("SKU-2", 1, 500).with_variant("L").with_image("tee.png"),
        line("SKU-1", 3, 1999),
    ];
    store.replace_all(user, &lines).await.unwrap();

    let cart = store.load(user).await.unwrap().unwrap();
    assert_eq!(cart.owner_key(), &OwnerKey::user(user));
    assert_eq!(cart.len(), 2);
    assert_eq!(cart.lines()[0].key(), LineKey::new("SKU-2", Some("L".into())));
    assert_eq!(cart.lines()[0].image_ref.as_deref(), Some("tee.png"));
    assert_eq!(cart.lines()[1].unit_price, Money::from_cents(1999));
    assert_eq!(cart.total(), Money::from_cents(500 + 3 * 1999));

    store.replace_all(user, &[line("SKU-3", 1, 100)]).await.unwrap();
    let cart = store.load(user).await.unwrap().unwrap();
    assert_eq!(cart.len(), 1);
    assert!(cart.line(&LineKey::product("SKU-1")).is_none());
}

#[tokio::test]
#[serial]
async fn test_upsert_modes() {
    let store = PostgresCartStore::new(get_pool().await);
    let user = UserId::new();

    store
        .upsert_line(user, &line("SKU-1", 2, 1000), UpsertMode::Increment)
        .await
        .unwrap();
    let stored = store
        .upsert_line(user, &line("SKU-1", 3, 1100), UpsertMode::Increment)
        .await
        .unwrap();
    assert_eq!(stored.quantity, 5);
    assert_eq!(stored.unit_price, Money::from_cents(1100));

    let stored = store
        .upsert_line(user, &line("SKU-1", 1, 1100), UpsertMode::Replace)
        .await
        .unwrap();
    assert_eq!(stored.quantity, 1);
}

#[tokio::test]
#[serial]
async fn test_concurrent_increments_are_not_lost() {
    let store = PostgresCartStore::new(get_pool().await);
    let user = UserId::new();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .upsert_line(user, &line("SKU-1", 1, 1000), UpsertMode::Increment)
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let cart = store.load(user).await.unwrap().unwrap();
    assert_eq!(cart.len(), 1);
    assert_eq!(cart.lines()[0].quantity, 10);
}

#[tokio::test]
#[serial]
async fn test_merge_guest_lines_keeps_concurrent_upsert() {
    let store = PostgresCartStore::new(get_pool().await);
    let user = UserId::new();
    store
        .replace_all(user, &[line("SKU-1", 1, 100)])
        .await
        .unwrap();

    let merging = store.clone();
    let upserting = store.clone();
    let (merged, upserted) = tokio::join!(
        async move {
            merging
                .merge_guest_lines(user, &[line("SKU-1", 2, 100), line("SKU-2", 1, 100)])
                .await
        },
        async move {
            upserting
                .upsert_line(user, &line("SKU-3", 5, 100), UpsertMode::Increment)
                .await
        }
    );
    merged.unwrap();
    upserted.unwrap();

    let cart = store.load(user).await.unwrap().unwrap();
    assert_eq!(cart.len(), 3);
    assert_eq!(cart.total_quantity(), 9);
}

#[tokio::test]
#[serial]
async fn test_remove_and_clear() {
    let store = PostgresCartStore::new(get_pool().await);
    let user = UserId::new();
    store
        .replace_all(user, &[line("SKU-1", 1, 100), line("SKU-2", 1, 100)])
        .await
        .unwrap();

    assert!(store.remove_line(user, &LineKey::product("SKU-1")).await.unwrap());
    assert!(!store.remove_line(user, &LineKey::product("SKU-1")).await.unwrap());

    store.clear(user).await.unwrap();
    let cart = store.load(user).await.unwrap().unwrap();
    assert!(cart.is_empty());
}

#[tokio::test]
#[serial]
async fn test_order_insert_and_lookup() {
    let store = PostgresOrderStore::new(get_pool().await);
    let order = order("pi_lookup");
    store.insert(&order).await.unwrap();

    let by_id = store.get(order.id).await.unwrap().unwrap();
    assert_eq!(by_id.order_number, order.order_number);
    assert_eq!(by_id.total, Money::from_cents(2500));
    assert_eq!(by_id.lines.len(), 1);
    assert_eq!(by_id.status, OrderStatus::Pending);

    let by_ref = store
        .find_by_payment_reference("pi_lookup")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_ref.id, order.id);
}

#[tokio::test]
#[serial]
async fn test_duplicate_payment_reference_rejected() {
    let store = PostgresOrderStore::new(get_pool().await);
    store.insert(&order("pi_dup")).await.unwrap();

    let err = store.insert(&order("pi_dup")).await.unwrap_err();
    assert!(matches!(err, StoreError::DuplicatePaymentReference(r) if r == "pi_dup"));
}

#[tokio::test]
#[serial]
async fn test_compare_and_set_status() {
    let store = PostgresOrderStore::new(get_pool().await);
    let order = order("pi_cas");
    store.insert(&order).await.unwrap();

    assert!(
        store
            .compare_and_set_status(
                order.id,
                OrderStatus::Pending,
                OrderStatus::Cancelled,
                StatusChange {
                    reason: Some("payment_failed"),
                    billing: None,
                },
            )
            .await
            .unwrap()
    );
    assert!(
        !store
            .compare_and_set_status(
                order.id,
                OrderStatus::Pending,
                OrderStatus::Paid,
                StatusChange::default(),
            )
            .await
            .unwrap()
    );

    let loaded = store.get(order.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, OrderStatus::Cancelled);
    assert_eq!(loaded.cancel_reason.as_deref(), Some("payment_failed"));
}

#[tokio::test]
#[serial]
async fn test_billing_address_upsert_keeps_one_row() {
    let pool = get_pool().await;
    let store = PostgresOrderStore::new(pool.clone());
    let order = order("pi_bill");
    store.insert(&order).await.unwrap();

    let first = Address {
        line1: "1 Main St".to_string(),
        city: "Springfield".to_string(),
        ..Default::default()
    };
    let second = Address {
        line1: "2 Side St".to_string(),
        ..first.clone()
    };
    store.upsert_billing_address(order.id, &first).await.unwrap();
    store.upsert_billing_address(order.id, &second).await.unwrap();

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM order_billing_addresses")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows, 1);

    let loaded = store.get(order.id).await.unwrap().unwrap();
    assert_eq!(loaded.billing_address, Some(second));
}

#[tokio::test]
#[serial]
async fn test_billing_written_only_with_winning_status_change() {
    let pool = get_pool().await;
    let store = PostgresOrderStore::new(pool.clone());
    let order = order("pi_cas_bill");
    store.insert(&order).await.unwrap();
    store
        .compare_and_set_status(
            order.id,
            OrderStatus::Pending,
            OrderStatus::Cancelled,
            StatusChange::default(),
        )
        .await
        .unwrap();

    let address = Address {
        line1: "3 Late St".to_string(),
        ..Default::default()
    };
    let written = store
        .compare_and_set_status(
            order.id,
            OrderStatus::Pending,
            OrderStatus::Paid,
            StatusChange {
                reason: None,
                billing: Some(&address),
            },
        )
        .await
        .unwrap();
    assert!(!written);

    let rows: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM order_billing_addresses WHERE order_id = $1")
            .bind(order.id.as_uuid())
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(rows, 0);
    let loaded = store.get(order.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, OrderStatus::Cancelled);
    assert!(loaded.billing_address.is_none());
}
