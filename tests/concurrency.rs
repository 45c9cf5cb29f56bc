//! Concurrency properties: N concurrent credits on one account, and N
//! concurrent opposing transfers between two accounts.

use std::sync::Arc;

use ledger_engine::engine::TransactionEngine;
use ledger_engine::events::EventBus;
use ledger_engine::locks::LockManager;
use ledger_engine::storage::{InMemoryStore, Storage};
use ledger_engine::wire::ProcessTransactionRequest;
use tokio_util::sync::CancellationToken;

fn request(operation: &str, account_id: &str, amount: i64, reference_id: String) -> ProcessTransactionRequest {
    ProcessTransactionRequest {
        operation: operation.to_string(),
        account_id: account_id.to_string(),
        amount,
        currency: "USD".to_string(),
        reference_id,
        target_account_id: None,
        original_transaction_id: None,
        metadata: None,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn n_concurrent_credits_sum_exactly() {
    let storage: Arc<dyn Storage> = Arc::new(InMemoryStore::new());
    let locks = Arc::new(LockManager::new());
    let (events, _receiver) = EventBus::new();
    let engine = Arc::new(TransactionEngine::new(storage.clone(), locks, events));
    let cancel = CancellationToken::new();

    const N: usize = 50;
    const V: i64 = 777;

    // Seed the account so every subsequent call resolves the same account
    // instead of racing on its lazy creation.
    engine
        .process_transaction(request("credit", "pool", 1, "SEED-REAL".to_string()), &cancel)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..N {
        let engine = engine.clone();
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            engine
                .process_transaction(
                    request("credit", "pool", V, format!("CREDIT-{i}")),
                    &cancel,
                )
                .await
                .unwrap();
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let account = storage
        .get_account_by_external_id("pool")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account.balance.minor_units(), 1 + N as i64 * V);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn n_concurrent_opposing_transfers_cancel_out() {
    let storage: Arc<dyn Storage> = Arc::new(InMemoryStore::new());
    let locks = Arc::new(LockManager::new());
    let (events, _receiver) = EventBus::new();
    let engine = Arc::new(TransactionEngine::new(storage.clone(), locks, events));
    let cancel = CancellationToken::new();

    const N: usize = 30;
    const V: i64 = 500;

    engine
        .process_transaction(request("credit", "x", 100_000, "SEED-X".to_string()), &cancel)
        .await
        .unwrap();
    engine
        .process_transaction(request("credit", "y", 100_000, "SEED-Y".to_string()), &cancel)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..N {
        let engine = engine.clone();
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            let mut req = request("transfer", "x", V, format!("XY-{i}"));
            req.target_account_id = Some("y".to_string());
            engine.process_transaction(req, &cancel).await.unwrap();
        }));

        let engine = engine.clone();
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            let mut req = request("transfer", "y", V, format!("YX-{i}"));
            req.target_account_id = Some("x".to_string());
            engine.process_transaction(req, &cancel).await.unwrap();
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let x = storage.get_account_by_external_id("x").await.unwrap().unwrap();
    let y = storage.get_account_by_external_id("y").await.unwrap().unwrap();
    assert_eq!(x.balance.minor_units(), 100_000);
    assert_eq!(y.balance.minor_units(), 100_000);
}
