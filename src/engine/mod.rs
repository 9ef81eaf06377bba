mod appointments;
mod conflict;
mod courses;
mod directory;
mod error;
#[cfg(test)]
mod tests;

pub use error::{EngineError, RuleViolation};

use std::io;
use std::path::PathBuf;

use tokio::sync::{RwLock, mpsc, oneshot};

use crate::journal::Journal;
use crate::model::*;
use crate::store::{Store, apply_to_progress, apply_to_schedule};

// ── Group-commit journal channel ─────────────────────────────────

pub(super) enum JournalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the journal and batches appends for group
/// commit: buffer the first append, drain everything immediately available,
/// fsync once for the whole batch, then answer all senders.
async fn journal_writer_loop(mut journal: Journal, mut rx: mpsc::Receiver<JournalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            JournalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                loop {
                    match rx.try_recv() {
                        Ok(JournalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush the batch before the non-append command.
                            flush_and_respond(&mut journal, &mut batch);
                            handle_non_append(&mut journal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut journal, &mut batch);
                }
            }
            other => handle_non_append(&mut journal, other),
        }
    }
}

fn flush_and_respond(
    journal: &mut Journal,
    batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>,
) {
    metrics::histogram!(crate::observability::JOURNAL_FLUSH_BATCH_SIZE)
        .record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(journal, batch);
    metrics::histogram!(crate::observability::JOURNAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(
    journal: &mut Journal,
    batch: &[(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = journal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes don't
    // leak into the next batch (callers were told this batch failed).
    let flush_err = journal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(journal: &mut Journal, cmd: JournalCommand) {
    match cmd {
        JournalCommand::Compact { events, response } => {
            let result = Journal::write_compact_file(journal.path(), &events)
                .and_then(|()| journal.swap_compact_file());
            let _ = response.send(result);
        }
        JournalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(journal.appends_since_compact());
        }
        JournalCommand::Append { .. } => unreachable!(),
    }
}

// ── Engine ───────────────────────────────────────────────────────

/// The two engines (appointments, course progress) over one journal-backed
/// store. All operations take the authenticated principal explicitly where
/// access rules apply; nothing is read from ambient state.
pub struct Engine {
    pub(crate) store: Store,
    journal_tx: mpsc::Sender<JournalCommand>,
    /// Held shared by every committing operation for its whole
    /// append-then-apply window, exclusively by compaction. A snapshot
    /// therefore sees every acknowledged commit and races none in flight.
    /// Lock order everywhere: gate first, then schedule/progress row.
    commit_gate: RwLock<()>,
}

impl Engine {
    pub fn new(journal_path: PathBuf) -> io::Result<Self> {
        let events = Journal::replay(&journal_path)?;
        let journal = Journal::open(&journal_path)?;
        let (journal_tx, journal_rx) = mpsc::channel(4096);
        tokio::spawn(journal_writer_loop(journal, journal_rx));

        let store = Store::new();

        // Replay — we're the sole owner of the row locks here, so try_write
        // always succeeds instantly. Never block: this may run inside an
        // async context.
        for event in &events {
            match event {
                Event::AppointmentBooked(a) => {
                    if let Some(sched) = store.schedule(&a.counselor_id) {
                        let mut guard =
                            sched.try_write().expect("replay: uncontended write");
                        apply_to_schedule(&mut guard, event, &store);
                    }
                }
                Event::AppointmentStatusChanged { counselor_id, .. } => {
                    if let Some(sched) = store.schedule(counselor_id) {
                        let mut guard =
                            sched.try_write().expect("replay: uncontended write");
                        apply_to_schedule(&mut guard, event, &store);
                    }
                }
                Event::ModuleCompleted {
                    user_id, course_id, ..
                } => {
                    if let Some(row) = store.progress_row(user_id, course_id) {
                        let mut guard = row.try_write().expect("replay: uncontended write");
                        apply_to_progress(&mut guard, event);
                    }
                }
                other => store.apply_global(other),
            }
        }

        Ok(Self {
            store,
            journal_tx,
            commit_gate: RwLock::new(()),
        })
    }

    /// Commit one event via the background group-commit writer. Until this
    /// returns Ok the event is not applied anywhere — a failed append is a
    /// full rollback.
    async fn journal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.journal_tx
            .send(JournalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::JournalError("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::JournalError("journal writer dropped response".into()))?
            .map_err(|e| EngineError::JournalError(e.to_string()))
    }

    /// Append + apply a store-level event.
    pub(super) async fn persist_global(&self, event: &Event) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        self.journal_append(event).await?;
        self.store.apply_global(event);
        Ok(())
    }

    /// Take the commit gate shared, blocking only against compaction.
    /// Callers that lock a schedule or progress row must take this first.
    pub(super) async fn commit_permit(&self) -> tokio::sync::RwLockReadGuard<'_, ()> {
        self.commit_gate.read().await
    }

    /// Append + apply an appointment event while the caller holds the
    /// commit gate and the schedule write lock, so the conflict re-check
    /// and the write are one atomic step relative to other transactions
    /// on this counselor.
    pub(super) async fn persist_to_schedule(
        &self,
        sched: &mut Schedule,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.journal_append(event).await?;
        apply_to_schedule(sched, event, &self.store);
        Ok(())
    }

    /// Append + apply a progress event while the caller holds the row lock.
    pub(super) async fn persist_to_progress(
        &self,
        row: &mut CourseProgress,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.journal_append(event).await?;
        apply_to_progress(row, event);
        Ok(())
    }

    /// Rewrite the journal as the minimal event set recreating current state.
    ///
    /// Takes the commit gate exclusively before snapshotting, so every
    /// acknowledged append is in the snapshot and no append can land in the
    /// old file after it.
    pub async fn compact_journal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;
        let events = self.store.snapshot_events().await;
        let (tx, rx) = oneshot::channel();
        self.journal_tx
            .send(JournalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::JournalError("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::JournalError("journal writer dropped response".into()))?
            .map_err(|e| EngineError::JournalError(e.to_string()))
    }

    pub async fn journal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .journal_tx
            .send(JournalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
