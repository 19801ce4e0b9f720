//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p ledger --test postgres_integration
//! ```

use std::sync::Arc;

use domain::{Currency, Money, NewTransaction, PaymentMethod, TransactionPatch, TransactionStatus};
use ledger::{
    LedgerError, PostgresTransactionStore, TransactionId, TransactionStore, TransactionStoreExt,
    UpdateOptions, UserId,
};
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
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

            // raw_sql runs every statement in the file
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_transactions_table.sql"
            ))
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

/// Tests share one database; each uses its own user id instead of truncating.
async fn get_test_store() -> PostgresTransactionStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    PostgresTransactionStore::new(pool)
}

fn new_tx(user: &UserId) -> NewTransaction {
    NewTransaction {
        user_id: user.clone(),
        phone_number: "8095551234".into(),
        operator_id: "D8DO".into(),
        origin_country: "US".into(),
        face_amount: Money::from_major(10),
        amount: Money::from_minor(1250),
        currency: Currency::new("USD").unwrap(),
        payment_method: PaymentMethod::Card,
    }
}

fn unique_user() -> UserId {
    UserId::new(format!("user-{}", TransactionId::new()))
}

#[tokio::test]
async fn create_and_get_round_trip() {
    let store = get_test_store().await;
    let user = unique_user();

    let created = store.create(new_tx(&user)).await.unwrap();
    let loaded = store.get_required(created.id).await.unwrap();

    assert_eq!(loaded.id, created.id);
    assert_eq!(loaded.status, TransactionStatus::Pending);
    assert_eq!(loaded.amount, Money::from_minor(1250));
    assert_eq!(loaded.currency.as_str(), "USD");
    assert_eq!(loaded.payment_method, PaymentMethod::Card);
    assert!(store.get(TransactionId::new()).await.unwrap().is_none());
}

#[tokio::test]
async fn full_lifecycle_is_audited() {
    let store = get_test_store().await;
    let tx = store.create(new_tx(&unique_user())).await.unwrap();

    store
        .transition(
            tx.id,
            TransactionStatus::Pending,
            TransactionPatch::status(TransactionStatus::PaymentPending)
                .with_payment_id(format!("pi_{}", tx.id)),
        )
        .await
        .unwrap();
    store
        .transition(
            tx.id,
            TransactionStatus::PaymentPending,
            TransactionPatch::status(TransactionStatus::PaymentConfirmed),
        )
        .await
        .unwrap();
    let done = store
        .transition(
            tx.id,
            TransactionStatus::PaymentConfirmed,
            TransactionPatch::status(TransactionStatus::Success)
                .with_provider_transaction_id(Some("DC-77".into()))
                .clear_error(),
        )
        .await
        .unwrap();

    assert_eq!(done.status, TransactionStatus::Success);
    assert_eq!(done.provider_transaction_id.as_deref(), Some("DC-77"));
    assert!(done.updated_at >= done.created_at);

    let history = store.history(tx.id).await.unwrap();
    let statuses: Vec<_> = history.iter().map(|t| t.to).collect();
    assert_eq!(
        statuses,
        vec![
            TransactionStatus::Pending,
            TransactionStatus::PaymentPending,
            TransactionStatus::PaymentConfirmed,
            TransactionStatus::Success,
        ]
    );
}

#[tokio::test]
async fn conditional_update_detects_stale_status() {
    let store = get_test_store().await;
    let tx = store.create(new_tx(&unique_user())).await.unwrap();

    let result = store
        .update(
            tx.id,
            TransactionPatch::status(TransactionStatus::PaymentConfirmed),
            UpdateOptions::expect_status(TransactionStatus::PaymentPending),
        )
        .await;

    assert!(matches!(
        result,
        Err(LedgerError::StatusConflict {
            actual: TransactionStatus::Pending,
            ..
        })
    ));
}

#[tokio::test]
async fn concurrent_writers_only_one_wins() {
    let store = get_test_store().await;
    let tx = store.create(new_tx(&unique_user())).await.unwrap();

    let a = store.transition(
        tx.id,
        TransactionStatus::Pending,
        TransactionPatch::status(TransactionStatus::PaymentPending).with_payment_id("pay-a"),
    );
    let b = store.transition(
        tx.id,
        TransactionStatus::Pending,
        TransactionPatch::status(TransactionStatus::Failed).with_error("charge failed"),
    );
    let (a, b) = tokio::join!(a, b);

    assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
    assert_eq!(store.history(tx.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn finished_records_are_immutable() {
    let store = get_test_store().await;
    let tx = store.create(new_tx(&unique_user())).await.unwrap();
    for (from, to) in [
        (TransactionStatus::Pending, TransactionStatus::PaymentPending),
        (TransactionStatus::PaymentPending, TransactionStatus::PaymentConfirmed),
        (TransactionStatus::PaymentConfirmed, TransactionStatus::Refunded),
    ] {
        store
            .transition(tx.id, from, TransactionPatch::status(to))
            .await
            .unwrap();
    }

    let result = store
        .update(
            tx.id,
            TransactionPatch::default().with_error("rewrite"),
            UpdateOptions::new(),
        )
        .await;
    assert!(matches!(result, Err(LedgerError::Transition { .. })));
}

#[tokio::test]
async fn list_and_lookup_queries() {
    let store = get_test_store().await;
    let user = unique_user();

    let older = store.create(new_tx(&user)).await.unwrap();
    let newer = store.create(new_tx(&user)).await.unwrap();
    let payment_id = format!("pay-{}", newer.id);
    store
        .transition(
            newer.id,
            TransactionStatus::Pending,
            TransactionPatch::status(TransactionStatus::PaymentPending)
                .with_payment_id(&payment_id),
        )
        .await
        .unwrap();

    let listed = store.list_by_user(&user).await.unwrap();
    assert_eq!(
        listed.iter().map(|t| t.id).collect::<Vec<_>>(),
        vec![newer.id, older.id]
    );

    let found = store.find_by_payment_id(&payment_id).await.unwrap().unwrap();
    assert_eq!(found.id, newer.id);

    let pending = store
        .list_by_status(TransactionStatus::PaymentPending)
        .await
        .unwrap();
    assert!(pending.iter().any(|t| t.id == newer.id));
    assert!(!pending.iter().any(|t| t.id == older.id));
}
