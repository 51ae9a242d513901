//! Concurrency properties of the in-memory ledger under a multi-threaded runtime.

use futures_util::future::join_all;
use inventory::{InMemoryInventoryLedger, InventoryLedger, LedgerError, ProductId};

const WORKERS: u32 = 16;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_reserves_never_oversell() {
    let ledger = InMemoryInventoryLedger::new();
    let sku = ProductId::new("SKU-HOT");
    let quantity = 3;
    ledger
        .register_product(&sku, WORKERS * quantity - 1, 0)
        .await
        .unwrap();

    let attempts = (0..WORKERS).map(|_| {
        let ledger = ledger.clone();
        let sku = sku.clone();
        tokio::spawn(async move { ledger.reserve(&sku, quantity).await })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let granted = results.iter().filter(|r| r.is_ok()).count() as u32;
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(LedgerError::InsufficientStock { .. })))
        .count() as u32;

    // One unit short of every worker's request: exactly one must lose.
    assert_eq!(rejected, 1);
    assert_eq!(granted, WORKERS - 1);

    let record = ledger.record(&sku).await.unwrap().unwrap();
    assert_eq!(record.reserved, granted * quantity);
    assert_eq!(record.available, quantity - 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn interleaved_reserve_release_conserves_stock() {
    let ledger = InMemoryInventoryLedger::new();
    let sku = ProductId::new("SKU-CHURN");
    ledger.register_product(&sku, 50, 0).await.unwrap();

    let tasks = (0..WORKERS).map(|i| {
        let ledger = ledger.clone();
        let sku = sku.clone();
        tokio::spawn(async move {
            let quantity = i % 4 + 1;
            for _ in 0..100 {
                if ledger.reserve(&sku, quantity).await.is_ok() {
                    ledger.release(&sku, quantity).await.unwrap();
                }
            }
        })
    });
    for joined in join_all(tasks).await {
        joined.unwrap();
    }

    let record = ledger.record(&sku).await.unwrap().unwrap();
    assert_eq!((record.available, record.reserved), (50, 0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn confirms_cannot_exceed_reservations() {
    let ledger = InMemoryInventoryLedger::new();
    let sku = ProductId::new("SKU-CONFIRM");
    ledger.register_product(&sku, 10, 0).await.unwrap();
    ledger.reserve(&sku, 4).await.unwrap();

    let tasks = (0..8).map(|_| {
        let ledger = ledger.clone();
        let sku = sku.clone();
        tokio::spawn(async move { ledger.confirm(&sku, 1).await })
    });
    let confirmed = join_all(tasks)
        .await
        .into_iter()
        .filter(|joined| matches!(joined, Ok(Ok(_))))
        .count();

    assert_eq!(confirmed, 4);
    let record = ledger.record(&sku).await.unwrap().unwrap();
    assert_eq!((record.available, record.reserved), (6, 0));
}
