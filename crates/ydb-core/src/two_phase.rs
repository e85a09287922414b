// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, instrument};
use ydb_types::base_types::{hash_key, LockId, TransactionId, TransactionState};
use ydb_types::error::{AbortReason, YdbError, YdbResult};

use crate::kv_store::KeyValueStore;
use crate::lock_client::LockClient;
use crate::transaction::{Bookkeeping, TransactionCoordinator};
use crate::wait_for_graph::WaitForGraph;

#[cfg(test)]
#[path = "unit_tests/two_phase_tests.rs"]
mod two_phase_tests;

struct TwoPhaseTransaction {
    state: TransactionState,
    held: BTreeSet<LockId>,
    /// Locks being waited for, with the order in which each wait began.
    waiting: BTreeMap<LockId, u64>,
    reads: BTreeMap<String, Vec<u8>>,
    writes: BTreeMap<String, Vec<u8>>,
}

impl TwoPhaseTransaction {
    fn new() -> Self {
        Self {
            state: TransactionState::Started,
            held: BTreeSet::new(),
            waiting: BTreeMap::new(),
            reads: BTreeMap::new(),
            writes: BTreeMap::new(),
        }
    }
}

struct TwoPhaseBooks {
    next_id: TransactionId,
    next_wait: u64,
    transactions: HashMap<TransactionId, TwoPhaseTransaction>,
    graph: WaitForGraph,
}

impl TwoPhaseBooks {
    fn started(&mut self, id: TransactionId) -> YdbResult<&mut TwoPhaseTransaction> {
        self.transactions
            .get_mut(&id)
            .filter(|txn| txn.state == TransactionState::Started)
            .ok_or(YdbError::InvalidTransaction { transaction_id: id })
    }

    /// Rebuild the wait-for graph from every started transaction's held and
    /// waiting locks. A waiter points at the holders of its lock and at the
    /// transactions that started waiting for it earlier.
    fn rebuild_graph(&mut self) {
        self.graph.clear();
        let transactions = &self.transactions;
        let started = move || {
            transactions
                .iter()
                .filter(|(_, txn)| txn.state == TransactionState::Started)
        };
        for (id, txn) in started().filter(|(_, txn)| !txn.waiting.is_empty()) {
            let targets = started()
                .filter(|(other, _)| *other != id)
                .filter(|(_, other)| {
                    txn.waiting.iter().any(|(lock_id, since)| {
                        other.held.contains(lock_id)
                            || other
                                .waiting
                                .get(lock_id)
                                .map_or(false, |other_since| other_since < since)
                    })
                })
                .map(|(other, _)| *other)
                .collect();
            self.graph.set_edges(*id, targets);
        }
    }

    /// Move a started transaction to `state`, returning the locks it held.
    fn finish(&mut self, id: TransactionId, state: TransactionState) -> BTreeSet<LockId> {
        let held = match self.transactions.get_mut(&id) {
            Some(txn) => {
                txn.state = state;
                txn.waiting.clear();
                txn.reads.clear();
                txn.writes.clear();
                std::mem::take(&mut txn.held)
            }
            None => BTreeSet::new(),
        };
        self.rebuild_graph();
        held
    }
}

enum Attempt {
    Held,
    Wait,
    Deadlock {
        cycle: Vec<TransactionId>,
        held: BTreeSet<LockId>,
    },
}

/// Strict two-phase locking.
///
/// A key's lock is taken on first access and kept until commit or abort.
/// Before blocking on a lock the transaction is entered in the wait-for
/// graph; a request that would close a cycle aborts its transaction instead
/// of waiting.
pub struct TwoPhaseCoordinator {
    books: Bookkeeping<TwoPhaseBooks>,
    store: KeyValueStore,
}

impl TwoPhaseCoordinator {
    pub fn new(locks: Arc<dyn LockClient>, store: KeyValueStore) -> Self {
        let books = TwoPhaseBooks {
            next_id: 1,
            next_wait: 0,
            transactions: HashMap::new(),
            graph: WaitForGraph::new(),
        };
        Self {
            books: Bookkeeping::new(locks, books),
            store,
        }
    }

    /// Transactions `id` currently waits for.
    pub async fn waiting_for(&self, id: TransactionId) -> YdbResult<BTreeSet<TransactionId>> {
        self.books
            .with(|books| books.graph.edges(id))
            .await
    }

    pub async fn state(&self, id: TransactionId) -> YdbResult<Option<TransactionState>> {
        self.books
            .with(|books| books.transactions.get(&id).map(|txn| txn.state))
            .await
    }

    async fn try_acquire(&self, id: TransactionId, lock_id: LockId) -> YdbResult {
        let attempt = self
            .books
            .with(|books| -> YdbResult<Attempt> {
                let since = books.next_wait;
                let txn = books.started(id)?;
                if txn.held.contains(&lock_id) {
                    return Ok(Attempt::Held);
                }
                txn.waiting.insert(lock_id, since);
                books.next_wait += 1;
                books.rebuild_graph();
                if let Some(cycle) = books.graph.find_cycle() {
                    let held = books.finish(id, TransactionState::Aborted);
                    return Ok(Attempt::Deadlock { cycle, held });
                }
                Ok(Attempt::Wait)
            })
            .await??;

        match attempt {
            Attempt::Held => return Ok(()),
            Attempt::Deadlock { cycle, held } => {
                info!(transaction_id = id, lock_id, ?cycle, "Deadlock detected, aborting");
                self.books.release_all(held).await?;
                return Err(YdbError::TransactionAborted {
                    transaction_id: id,
                    reason: AbortReason::Deadlock,
                });
            }
            Attempt::Wait => (),
        }

        if let Err(err) = self.books.locks().acquire(lock_id).await {
            error!(transaction_id = id, lock_id, error = %err, "Lock acquire failed");
            self.books
                .with(|books| {
                    if let Some(txn) = books.transactions.get_mut(&id) {
                        txn.waiting.remove(&lock_id);
                    }
                    books.rebuild_graph();
                })
                .await?;
            return Err(err);
        }

        let still_started = self
            .books
            .with(|books| {
                let Ok(txn) = books.started(id) else {
                    return false;
                };
                txn.waiting.remove(&lock_id);
                txn.held.insert(lock_id);
                books.rebuild_graph();
                true
            })
            .await?;
        if !still_started {
            // Ended while we were blocked.
            self.books.locks().release(lock_id).await?;
            return Err(YdbError::InvalidTransaction { transaction_id: id });
        }
        debug!(transaction_id = id, lock_id, "Lock acquired");
        Ok(())
    }

    async fn abort_with(&self, id: TransactionId, error: YdbError) -> YdbError {
        match self
            .books
            .with(|books| books.finish(id, TransactionState::Aborted))
            .await
        {
            Ok(held) => {
                if let Err(release_error) = self.books.release_all(held).await {
                    error!(transaction_id = id, %release_error, "Failed to release locks after abort");
                }
            }
            Err(books_error) => {
                error!(transaction_id = id, %books_error, "Failed to abort transaction");
            }
        }
        error
    }
}

#[async_trait]
impl TransactionCoordinator for TwoPhaseCoordinator {
    async fn begin(&self) -> YdbResult<TransactionId> {
        let id = self
            .books
            .with(|books| {
                let id = books.next_id;
                books.next_id += 1;
                books.transactions.insert(id, TwoPhaseTransaction::new());
                id
            })
            .await?;
        debug!(transaction_id = id, "Transaction started");
        Ok(id)
    }

    #[instrument(level = "trace", skip_all, fields(transaction_id = id))]
    async fn commit(&self, id: TransactionId) -> YdbResult {
        let writes = self
            .books
            .with(|books| books.started(id).map(|txn| std::mem::take(&mut txn.writes)))
            .await??;

        // Not atomic against the store: a failed write leaves the keys written
        // before it in place and aborts the transaction.
        for (key, value) in writes {
            if let Err(error) = self.store.write(&key, value).await {
                return Err(self.abort_with(id, error).await);
            }
        }

        let held = self
            .books
            .with(|books| books.finish(id, TransactionState::Committed))
            .await?;
        self.books.release_all(held).await?;
        debug!(transaction_id = id, "Transaction committed");
        Ok(())
    }

    #[instrument(level = "trace", skip_all, fields(transaction_id = id))]
    async fn abort(&self, id: TransactionId) -> YdbResult {
        let held = self
            .books
            .with(|books| match books.transactions.get(&id).map(|txn| txn.state) {
                Some(TransactionState::Started) => Ok(books.finish(id, TransactionState::Aborted)),
                Some(TransactionState::Aborted) => Ok(BTreeSet::new()),
                _ => Err(YdbError::InvalidTransaction { transaction_id: id }),
            })
            .await??;
        self.books.release_all(held).await?;
        debug!(transaction_id = id, "Transaction aborted");
        Ok(())
    }

    #[instrument(level = "trace", skip_all, fields(transaction_id = id, key = key))]
    async fn get(&self, id: TransactionId, key: &str) -> YdbResult<Vec<u8>> {
        self.try_acquire(id, hash_key(key)).await?;

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
        self.try_acquire(id, hash_key(key)).await?;
        self.books
            .with(|books| {
                books.started(id).map(|txn| {
                    txn.writes.insert(key.to_owned(), value);
                })
            })
            .await?
    }
}
