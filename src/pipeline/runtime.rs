//! Threads behind a pipeline run.
//!
//! Two pieces, both on crossbeam channels:
//!
//! - [`StagePool`]: a bounded pool running classify, atomize and normalize.
//!   These stages are pure, so records are spread over any number of
//!   workers and reassembled in source order.
//! - [`StoreWriter`]: the one thread allowed to mutate the canonical store and
//!   the progress ledger. It applies prepared batches in order and commits
//!   each batch to the ledger in one step.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use log::{debug, info, warn};

use crate::canonicalizer::Canonicalizer;
use crate::classifier::ClassifierStats;
use crate::error::{ColetorError, ColetorResult};
use crate::source::SourceRecord;
use crate::storage::{Compactable, ProgressLedger};

use super::{Prepared, PreparedRecord, Stages};

/// Prepared batches the writer may hold before the producer blocks.
const WRITER_QUEUE: usize = 2;

struct Job {
    index: usize,
    record: SourceRecord,
    reply: Sender<(usize, PreparedRecord)>,
}

/// Worker pool for the pure stages.
pub(crate) struct StagePool {
    tx: Sender<Job>,
    workers: Vec<JoinHandle<()>>,
}

impl StagePool {
    pub(crate) fn start(workers: usize, queue_capacity: usize, stages: Arc<Stages>) -> ColetorResult<Self> {
        let workers = workers.max(1);
        let (tx, rx) = bounded::<Job>(queue_capacity.max(1));

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx: Receiver<Job> = rx.clone();
            let stages = Arc::clone(&stages);
            let handle = thread::Builder::new()
                .name(format!("coletor-stage-{idx}"))
                .spawn(move || {
                    while let Ok(Job { index, record, reply }) = rx.recv() {
                        let _ = reply.send((index, stages.prepare(record)));
                    }
                })
                .map_err(|e| ColetorError::internal(format!("failed to spawn stage worker: {e}")))?;
            handles.push(handle);
        }

        Ok(Self { tx, workers: handles })
    }

    /// Runs the stages over `records`, returning results in input order.
    pub(crate) fn prepare_batch(&self, records: Vec<SourceRecord>) -> ColetorResult<Vec<PreparedRecord>> {
        let expected = records.len();
        let (reply_tx, reply_rx) = unbounded();
        for (index, record) in records.into_iter().enumerate() {
            self.tx
                .send(Job {
                    index,
                    record,
                    reply: reply_tx.clone(),
                })
                .map_err(|_| ColetorError::internal("stage pool is shut down"))?;
        }
        drop(reply_tx);

        let mut prepared: Vec<(usize, PreparedRecord)> = reply_rx.iter().collect();
        if prepared.len() != expected {
            return Err(ColetorError::internal(format!(
                "stage workers returned {} of {expected} records",
                prepared.len()
            )));
        }
        prepared.sort_unstable_by_key(|(index, _)| *index);
        Ok(prepared.into_iter().map(|(_, record)| record).collect())
    }

    pub(crate) fn shutdown(self) {
        // Workers drain queued jobs then exit.
        drop(self.tx);
        for handle in self.workers {
            let _ = handle.join();
        }
    }
}

/// What the writer saw over a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct WriterTally {
    pub(crate) processed: u64,
    pub(crate) empty: u64,
    pub(crate) discarded: u64,
    pub(crate) errors: BTreeMap<&'static str, u64>,
    pub(crate) fragments: u64,
    pub(crate) fragments_dropped: u64,
    pub(crate) entities_created: u64,
    pub(crate) entities_updated: u64,
    pub(crate) batches: u64,
    pub(crate) compactions: u64,
    pub(crate) classifier: ClassifierStats,
}

impl WriterTally {
    fn error(&mut self, record_id: &str, err: &ColetorError) {
        warn!("skipping record {record_id}: {err}");
        *self.errors.entry(err.kind()).or_default() += 1;
    }
}

struct Batch {
    number: u64,
    records: Vec<PreparedRecord>,
}

/// Everything the writer thread owns.
pub(crate) struct WriterParts {
    pub(crate) canonicalizer: Canonicalizer,
    pub(crate) ledger: Arc<dyn ProgressLedger>,
    pub(crate) compactor: Option<Arc<dyn Compactable>>,
    pub(crate) compact_every: u64,
}

impl WriterParts {
    fn apply(&self, batch: Batch, tally: &mut WriterTally) -> ColetorResult<()> {
        let mut ids = Vec::with_capacity(batch.records.len());
        for record in batch.records {
            if let Some(classification) = &record.classification {
                tally.classifier.record(classification);
            }
            match record.outcome {
                Prepared::Empty => tally.empty += 1,
                Prepared::Discarded => tally.discarded += 1,
                Prepared::Failed(err) => {
                    if err.is_fatal() {
                        return Err(err);
                    }
                    tally.error(&record.id, &err);
                }
                Prepared::Fragments { fragments, dropped } => {
                    tally.fragments_dropped += dropped;
                    for fragment in fragments {
                        match self.canonicalizer.canonicalize(
                            &fragment.normalized,
                            fragment.entity_type,
                            fragment.confidence,
                        ) {
                            Ok(outcome) => {
                                tally.fragments += 1;
                                if outcome.is_new {
                                    tally.entities_created += 1;
                                } else {
                                    tally.entities_updated += 1;
                                }
                            }
                            Err(err) if err.is_fatal() => return Err(err),
                            Err(err) => tally.error(&record.id, &err),
                        }
                    }
                }
            }
            ids.push(record.id);
        }

        let marked = self.ledger.mark_batch_processed(&ids, batch.number)?;
        tally.processed += marked as u64;
        tally.batches += 1;
        debug!("batch {} committed ({marked} records)", batch.number);

        if let Some(compactor) = &self.compactor {
            let due = self.compact_every > 0 && tally.batches % self.compact_every == 0;
            if due || compactor.needs_compaction()? {
                let result = compactor.compact()?;
                tally.compactions += 1;
                info!(
                    "compacted {} entries after batch {} (log {} -> {} bytes)",
                    result.entries_compacted, batch.number, result.wal_size_before, result.wal_size_after
                );
            }
        }
        Ok(())
    }
}

/// Single owner of all store and ledger mutations during a run.
pub(crate) struct StoreWriter {
    tx: Sender<Batch>,
    handle: JoinHandle<(WriterTally, Option<ColetorError>)>,
}

impl StoreWriter {
    pub(crate) fn start(parts: WriterParts) -> ColetorResult<Self> {
        let (tx, rx) = bounded::<Batch>(WRITER_QUEUE);
        let handle = thread::Builder::new()
            .name("coletor-writer".to_string())
            .spawn(move || {
                let mut tally = WriterTally::default();
                while let Ok(batch) = rx.recv() {
                    let number = batch.number;
                    if let Err(err) = parts.apply(batch, &mut tally) {
                        warn!("store writer stopped at batch {number}: {err}");
                        return (tally, Some(err));
                    }
                }
                (tally, None)
            })
            .map_err(|e| ColetorError::internal(format!("failed to spawn store writer: {e}")))?;
        Ok(Self { tx, handle })
    }

    /// Queues a prepared batch. Fails once the writer has stopped.
    pub(crate) fn submit(&self, number: u64, records: Vec<PreparedRecord>) -> ColetorResult<()> {
        self.tx
            .send(Batch { number, records })
            .map_err(|_| ColetorError::internal("store writer has stopped"))
    }

    /// Waits for queued batches to be applied.
    pub(crate) fn finish(self) -> (WriterTally, Option<ColetorError>) {
        drop(self.tx);
        match self.handle.join() {
            Ok(result) => result,
            Err(_) => (
                WriterTally::default(),
                Some(ColetorError::internal("store writer panicked")),
            ),
        }
    }
}
