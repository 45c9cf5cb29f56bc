use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::Arc;

use ledger_engine::engine::TransactionEngine;
use ledger_engine::events::{DomainEvent, EventBus, EventHandler};
use ledger_engine::locks::LockManager;
use ledger_engine::storage::{InMemoryStore, Storage};
use ledger_engine::wire::ProcessTransactionRequest;
use tokio_util::sync::CancellationToken;

/// Logs every processed event at `info`; the demo has no other consumer.
struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &DomainEvent) -> Result<(), String> {
        tracing::info!(?event, "domain event processed");
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let request_filename = std::env::args()
        .nth(1)
        .expect("Usage: ledger-engine {requests.jsonl}");
    let file = File::open(&request_filename)
        .unwrap_or_else(|err| panic!("Couldn't open request file at {request_filename}: {err}"));
    let reader = BufReader::new(file);

    let storage: Arc<dyn Storage> = Arc::new(InMemoryStore::new());
    let locks = Arc::new(LockManager::new());
    let (events, receiver) = EventBus::new();
    let cancel = CancellationToken::new();
    let worker = EventBus::spawn_worker(receiver, LoggingHandler, cancel.clone());

    let engine = TransactionEngine::new(storage, locks, events);

    for line in reader.lines() {
        let line = line.unwrap_or_else(|err| panic!("Failed to read request line: {err}"));
        if line.trim().is_empty() {
            continue;
        }
        let request: ProcessTransactionRequest = serde_json::from_str(&line)
            .unwrap_or_else(|err| panic!("Failed to parse request '{line}': {err}"));
        match engine.process_transaction(request, &cancel).await {
            Ok(response) => println!("{}", serde_json::to_string(&response).unwrap()),
            Err(err) => eprintln!("request failed: {err}"),
        }
    }

    cancel.cancel();
    worker.await.unwrap();
}
