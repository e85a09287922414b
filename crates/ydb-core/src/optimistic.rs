// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};
use ydb_types::base_types::{TransactionId, TransactionState};
use ydb_types::error::{AbortReason, YdbError, YdbResult};

use crate::kv_store::KeyValueStore;
use crate::lock_client::LockClient;
use crate::transaction::{Bookkeeping, TransactionCoordinator};

#[cfg(test)]
#[path = "unit_tests/optimistic_tests.rs"]
mod optimistic_tests;

struct OptimisticTransaction {
    state: TransactionState,
    reads: BTreeMap<String, Vec<u8>>,
    writes: BTreeMap<String, Vec<u8>>,
}

struct OptimisticBooks {
    next_id: TransactionId,
    transactions: HashMap<TransactionId, OptimisticTransaction>,
}

impl OptimisticBooks {
    fn started(&mut self, id: TransactionId) -> YdbResult<&mut OptimisticTransaction> {
        self.transactions
            .get_mut(&id)
            .filter(|txn| txn.state == TransactionState::Started)
            .ok_or(YdbError::InvalidTransaction { transaction_id: id })
    }

    fn finish(&mut self, id: TransactionId, state: TransactionState) {
        if let Some(txn) = self.transactions.get_mut(&id) {
            txn.state = state;
            txn.reads.clear();
            txn.writes.clear();
        }
    }
}

/// Optimistic concurrency control.
///
/// Transactions never lock keys. Reads are snapshotted on first access and
/// writes are buffered; `commit` re-reads every snapshotted key under the
/// bookkeeping lock and installs the writes only if none changed. Commits are
/// serialized by that lock.
pub struct OptimisticCoordinator {
    books: Bookkeeping<OptimisticBooks>,
    store: KeyValueStore,
}

impl OptimisticCoordinator {
    pub fn new(locks: Arc<dyn LockClient>, store: KeyValueStore) -> Self {
        let books = OptimisticBooks {
            next_id: 1,
            transactions: HashMap::new(),
        };
        Self {
            books: Bookkeeping::new(locks, books),
            store,
        }
    }

    pub async fn state(&self, id: TransactionId) -> YdbResult<Option<TransactionState>> {
        self.books
            .with(|books| books.transactions.get(&id).map(|txn| txn.state))
            .await
    }

    /// Check the read set and install the write set. Runs under the
    /// bookkeeping lock; leaves the transaction committed or aborted.
    async fn validate_and_install(&self, id: TransactionId) -> YdbResult {
        let guard = self.books.enter().await?;
        let result = async {
            let (reads, writes) = {
                let mut books = guard.state();
                let txn = books.started(id)?;
                (
                    std::mem::take(&mut txn.reads),
                    std::mem::take(&mut txn.writes),
                )
            };

            let mut outcome: YdbResult = Ok(());
            for (key, snapshot) in &reads {
                match self.store.read(key).await {
                    Ok(current) if current == *snapshot => continue,
                    Ok(_) => {
                        info!(transaction_id = id, key = key.as_str(), "Validation failed");
                        outcome = Err(YdbError::TransactionAborted {
                            transaction_id: id,
                            reason: AbortReason::ValidationFailed,
                        });
                    }
                    Err(error) => outcome = Err(error),
                }
                break;
            }
            if outcome.is_ok() {
                for (key, value) in writes {
                    if let Err(error) = self.store.write(&key, value).await {
                        outcome = Err(error);
                        break;
                    }
                }
            }

            let state = match outcome {
                Ok(()) => TransactionState::Committed,
                Err(_) => TransactionState::Aborted,
            };
            guard.state().finish(id, state);
            outcome
        }
        .await;

        if let Err(error) = guard.exit().await {
            warn!(transaction_id = id, %error, "Failed to release bookkeeping lock");
            return result.and(Err(error));
        }
        result
    }
}

#[async_trait]
impl TransactionCoordinator for OptimisticCoordinator {
    async fn begin(&self) -> YdbResult<TransactionId> {
        let id = self
            .books
            .with(|books| {
                let id = books.next_id;
                books.next_id += 1;
                books.transactions.insert(
                    id,
                    OptimisticTransaction {
                        state: TransactionState::Started,
                        reads: BTreeMap::new(),
                        writes: BTreeMap::new(),
                    },
                );
                id
            })
            .await?;
        debug!(transaction_id = id, "Transaction started");
        Ok(id)
    }

    #[instrument(level = "trace", skip_all, fields(transaction_id = id))]
    async fn commit(&self, id: TransactionId) -> YdbResult {
        self.validate_and_install(id).await?;
        debug!(transaction_id = id, "Transaction committed");
        Ok(())
    }

    #[instrument(level = "trace", skip_all, fields(transaction_id = id))]
    async fn abort(&self, id: TransactionId) -> YdbResult {
        self.books
            .with(|books| match books.transactions.get(&id).map(|txn| txn.state) {
                Some(TransactionState::Started) => {
                    books.finish(id, TransactionState::Aborted);
                    Ok(())
                }
                Some(TransactionState::Aborted) => Ok(()),
                _ => Err(YdbError::InvalidTransaction { transaction_id: id }),
            })
            .await?
    }

    #[instrument(level = "trace", skip_all, fields(transaction_id = id, key = key))]
    async fn get(&self, id: TransactionId, key: &str) -> YdbResult<Vec<u8>> {
        let cached = self
            .books
            .with(|books| {
                books.started(id).map(|txn| {
                    txn.writes
                        .get(key)
                        .or_else(|| txn.reads.get(key))
                        .cloned()
                })
            })
            .await??;
        if let Some(value) = cached {
            return Ok(value);
        }

        let value = self.store.read(key).await?;
        self.books
            .with(|books| {
                books.started(id).map(|txn| {
                    txn.reads
                        .entry(key.to_owned())
                        .or_insert(value)
                        .clone()
                })
            })
            .await?
    }

    #[instrument(level = "trace", skip_all, fields(transaction_id = id, key = key))]
    async fn set(&self, id: TransactionId, key: &str, value: Vec<u8>) -> YdbResult {
        self.books
            .with(|books| {
                books.started(id).map(|txn| {
                    txn.writes.insert(key.to_owned(), value);
                })
            })
            .await?
    }
}
