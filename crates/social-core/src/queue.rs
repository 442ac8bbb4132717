use std::{
    collections::{HashMap, HashSet, VecDeque},
    iter,
    time::Instant,
};

use tracing::{debug, warn};

use crate::{
    error::{ClientErrorCode, EventErrorCode, SocialError},
    retry::RetryPolicy,
    types::{DeleteRequest, Event, EventMutation, LocalEventHandle, MutationAck, MutationOutcome, RemoteDelete},
};

/// Pending mutation as held by the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum QueuedMutation {
    Create {
        handle: LocalEventHandle,
        event: Event,
    },
    Delete(QueuedDelete),
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueuedDelete {
    /// Ready to send.
    Remote(RemoteDelete),
    /// Delete of an event that was in flight when the delete was requested;
    /// resolved to its server id at the next flush.
    AfterAck(LocalEventHandle),
}

#[derive(Debug, Clone)]
pub struct QueueEntry {
    seq: u64,
    enqueued_at: Instant,
    failed_attempts: u32,
    mutation: QueuedMutation,
}

impl QueueEntry {
    /// Monotonic enqueue order.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    pub fn mutation(&self) -> &QueuedMutation {
        &self.mutation
    }
}

/// What an accepted delete request did to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The create was still queued and has been removed; nothing is sent.
    CancelledUnsent,
    /// A remote delete was appended.
    QueuedRemote,
    /// The create is in flight; its delete is sent once it is acknowledged.
    DeferredUntilSent,
}

#[derive(Debug, Clone)]
struct BatchEntry {
    seq: u64,
    enqueued_at: Instant,
    failed_attempts: u32,
    mutation: EventMutation,
}

/// Snapshot of the queue taken by one flush.
#[derive(Debug, Clone)]
pub struct FlushBatch {
    generation: u64,
    entries: Vec<BatchEntry>,
}

impl FlushBatch {
    /// Mutations in FIFO order, as handed to the transport.
    pub fn mutations(&self) -> Vec<EventMutation> {
        self.entries
            .iter()
            .map(|entry| entry.mutation.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Result of applying a flush batch's outcomes to the queue.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushReport {
    /// Acknowledged creates with their server ids populated.
    pub created: Vec<Event>,
    /// Acknowledged remote deletes.
    pub deleted: Vec<RemoteDelete>,
    /// Failed mutations put back at the head of the queue.
    pub requeued: usize,
    /// Terminal failures; their mutations were dropped.
    pub abandoned: Vec<SocialError>,
    /// Largest retry hint among requeued failures.
    pub retry_after_ms: Option<u64>,
    /// The queue was cleared while the batch was in flight; nothing applied.
    pub stale: bool,
}

impl FlushReport {
    pub fn stale() -> Self {
        Self {
            stale: true,
            ..Self::default()
        }
    }

    pub fn has_failures(&self) -> bool {
        self.requeued > 0 || !self.abandoned.is_empty()
    }
}

/// FIFO of local event mutations awaiting a flush.
#[derive(Debug, Default)]
pub struct EventQueue {
    entries: VecDeque<QueueEntry>,
    next_seq: u64,
    generation: u64,
    in_flight: HashSet<LocalEventHandle>,
    acknowledged: HashMap<LocalEventHandle, String>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.iter()
    }

    /// Bumped whenever the queue is cleared.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Server id assigned to a previously queued event, once acknowledged.
    pub fn acknowledged_id(&self, handle: LocalEventHandle) -> Option<&str> {
        self.acknowledged.get(&handle).map(String::as_str)
    }

    /// Queue an event for creation and return it with its local handle set.
    pub fn enqueue_create(&mut self, mut event: Event) -> Result<Event, SocialError> {
        if let Some(id) = &event.id {
            return Err(SocialError::event(
                EventErrorCode::IdIsAlreadySet,
                format!("event already carries server id '{id}'"),
            ));
        }
        if event.event_type.trim().is_empty() {
            return Err(SocialError::event(
                EventErrorCode::TypeSize,
                "event type must not be empty",
            ));
        }
        if let Some(handle) = event.local_handle {
            return Err(SocialError::client(
                ClientErrorCode::InconsistentData,
                format!("event {handle} was already queued"),
            ));
        }

        let handle = LocalEventHandle::new();
        event.local_handle = Some(handle);
        debug!(%handle, event_type = %event.event_type, "queued event create");
        self.push(QueuedMutation::Create {
            handle,
            event: event.clone(),
        });
        Ok(event)
    }

    pub fn enqueue_delete(&mut self, request: DeleteRequest) -> Result<DeleteOutcome, SocialError> {
        match request {
            DeleteRequest::Handle(handle) => self.delete_by_handle(handle),
            DeleteRequest::Event(event) => {
                if let Some(id) = event.id {
                    return Ok(self.push_remote(RemoteDelete::EventId(id)));
                }
                if let Some(handle) = event.local_handle {
                    return self.delete_by_handle(handle);
                }
                let Some(object_id) = event.object_key() else {
                    return Err(SocialError::event(
                        EventErrorCode::IdInvalid,
                        "event has neither an id, a local handle nor an object",
                    ));
                };
                let object_id = object_id.to_owned();
                self.delete_matching(event.event_type, object_id)
            }
            DeleteRequest::Matching { event_type, object } => {
                self.delete_matching(event_type, object.id().to_owned())
            }
        }
    }

    /// Move every queued mutation into a batch, leaving the queue empty.
    pub fn take_batch(&mut self) -> Option<FlushBatch> {
        if self.entries.is_empty() {
            return None;
        }

        let mut entries = Vec::with_capacity(self.entries.len());
        for entry in self.entries.drain(..) {
            let mutation = match entry.mutation {
                QueuedMutation::Create { handle, event } => {
                    self.in_flight.insert(handle);
                    EventMutation::Create { handle, event }
                }
                QueuedMutation::Delete(QueuedDelete::Remote(target)) => {
                    EventMutation::Delete(target)
                }
                QueuedMutation::Delete(QueuedDelete::AfterAck(handle)) => {
                    match self.acknowledged.get(&handle) {
                        Some(id) => EventMutation::Delete(RemoteDelete::EventId(id.clone())),
                        None => {
                            debug!(%handle, "dropping delete for an event that was never acknowledged");
                            continue;
                        }
                    }
                }
            };
            entries.push(BatchEntry {
                seq: entry.seq,
                enqueued_at: entry.enqueued_at,
                failed_attempts: entry.failed_attempts,
                mutation,
            });
        }

        if entries.is_empty() {
            return None;
        }
        Some(FlushBatch {
            generation: self.generation,
            entries,
        })
    }

    /// Apply per-mutation outcomes (positionally matching the batch).
    pub fn complete_batch(
        &mut self,
        batch: FlushBatch,
        outcomes: Vec<MutationOutcome>,
        policy: &RetryPolicy,
    ) -> FlushReport {
        if batch.generation != self.generation {
            debug!(
                batch_generation = batch.generation,
                generation = self.generation,
                "discarding flush results for a cleared queue"
            );
            return FlushReport::stale();
        }

        let mut report = FlushReport::default();
        let mut requeue = Vec::new();
        let mut outcomes = outcomes.into_iter();

        for entry in batch.entries {
            let outcome = outcomes.next().unwrap_or_else(|| {
                Err(SocialError::client(
                    ClientErrorCode::InconsistentData,
                    "transport returned fewer outcomes than submitted mutations",
                ))
            });

            let error = match (&entry.mutation, outcome) {
                (EventMutation::Create { handle, .. }, Ok(MutationAck::Created { event, .. })) => {
                    self.in_flight.remove(handle);
                    let mut event = event;
                    match &event.id {
                        Some(id) => {
                            self.acknowledged.insert(*handle, id.clone());
                        }
                        None => warn!(%handle, "service acknowledged an event without an id"),
                    }
                    event.local_handle = Some(*handle);
                    report.created.push(event);
                    continue;
                }
                (EventMutation::Delete(target), Ok(MutationAck::Deleted)) => {
                    report.deleted.push(target.clone());
                    continue;
                }
                (_, Ok(ack)) => SocialError::client(
                    ClientErrorCode::InconsistentData,
                    format!("acknowledgement {ack:?} does not match the submitted mutation"),
                ),
                (_, Err(error)) => error,
            };

            let failed_attempts = entry.failed_attempts.saturating_add(1);
            if let EventMutation::Create { handle, .. } = &entry.mutation {
                self.in_flight.remove(handle);
            }

            if error.is_recoverable() && policy.allows_retry(failed_attempts) {
                report.retry_after_ms = report.retry_after_ms.max(error.retry_after_ms());
                requeue.push(QueueEntry {
                    seq: entry.seq,
                    enqueued_at: entry.enqueued_at,
                    failed_attempts,
                    mutation: requeued_mutation(entry.mutation),
                });
            } else {
                warn!(
                    seq = entry.seq,
                    failed_attempts,
                    error = %error,
                    "dropping queued event mutation after terminal failure"
                );
                report.abandoned.push(error);
            }
        }

        requeue.retain(|entry| !self.cancel_deferred_delete(entry));
        report.requeued = requeue.len();
        for entry in requeue.into_iter().rev() {
            self.entries.push_front(entry);
        }

        report
    }

    /// Treat every mutation of the batch as failed with the same error.
    pub fn fail_batch(
        &mut self,
        batch: FlushBatch,
        error: SocialError,
        policy: &RetryPolicy,
    ) -> FlushReport {
        let outcomes = iter::repeat_n(Err(error), batch.len()).collect();
        self.complete_batch(batch, outcomes, policy)
    }

    /// Drop everything, including bookkeeping for in-flight batches.
    ///
    /// Returns the number of queued mutations that were discarded.
    pub fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        self.in_flight.clear();
        self.acknowledged.clear();
        self.generation = self.generation.wrapping_add(1);
        dropped
    }

    fn push(&mut self, mutation: QueuedMutation) {
        self.entries.push_back(QueueEntry {
            seq: self.next_seq,
            enqueued_at: Instant::now(),
            failed_attempts: 0,
            mutation,
        });
        self.next_seq += 1;
    }

    fn push_remote(&mut self, target: RemoteDelete) -> DeleteOutcome {
        debug!(?target, "queued remote event delete");
        self.push(QueuedMutation::Delete(QueuedDelete::Remote(target)));
        DeleteOutcome::QueuedRemote
    }

    fn delete_by_handle(&mut self, handle: LocalEventHandle) -> Result<DeleteOutcome, SocialError> {
        if let Some(pos) = self.entries.iter().position(|entry| {
            matches!(&entry.mutation, QueuedMutation::Create { handle: queued, .. } if *queued == handle)
        }) {
            self.entries.remove(pos);
            debug!(%handle, "cancelled unsent event create");
            return Ok(DeleteOutcome::CancelledUnsent);
        }
        if let Some(id) = self.acknowledged.get(&handle).cloned() {
            return Ok(self.push_remote(RemoteDelete::EventId(id)));
        }
        if self.in_flight.contains(&handle) {
            debug!(%handle, "deferring delete until the in-flight create is acknowledged");
            self.push(QueuedMutation::Delete(QueuedDelete::AfterAck(handle)));
            return Ok(DeleteOutcome::DeferredUntilSent);
        }
        Err(SocialError::event(
            EventErrorCode::NotFound,
            format!("no queued or sent event for {handle}"),
        ))
    }

    fn delete_matching(
        &mut self,
        event_type: String,
        object_id: String,
    ) -> Result<DeleteOutcome, SocialError> {
        if event_type.trim().is_empty() {
            return Err(SocialError::event(
                EventErrorCode::TypeSize,
                "event type must not be empty",
            ));
        }
        if object_id.trim().is_empty() {
            return Err(SocialError::client(
                ClientErrorCode::InconsistentData,
                "object id must not be empty",
            ));
        }

        if let Some(pos) = self.entries.iter().rposition(|entry| {
            matches!(&entry.mutation, QueuedMutation::Create { event, .. } if event.matches(&event_type, &object_id))
        }) {
            self.entries.remove(pos);
            debug!(%event_type, %object_id, "cancelled unsent event create");
            return Ok(DeleteOutcome::CancelledUnsent);
        }

        Ok(self.push_remote(RemoteDelete::Matching {
            event_type,
            object_id,
        }))
    }

    /// Cancel a requeued create against a delete that waited for its
    /// acknowledgement. Returns `true` when the pair was removed.
    fn cancel_deferred_delete(&mut self, entry: &QueueEntry) -> bool {
        let QueuedMutation::Create { handle, .. } = &entry.mutation else {
            return false;
        };
        let Some(pos) = self.entries.iter().position(|queued| {
            matches!(&queued.mutation, QueuedMutation::Delete(QueuedDelete::AfterAck(h)) if h == handle)
        }) else {
            return false;
        };
        self.entries.remove(pos);
        debug!(%handle, "cancelled requeued event create against its pending delete");
        true
    }
}

fn requeued_mutation(mutation: EventMutation) -> QueuedMutation {
    match mutation {
        EventMutation::Create { handle, event } => QueuedMutation::Create { handle, event },
        EventMutation::Delete(target) => QueuedMutation::Delete(QueuedDelete::Remote(target)),
    }
}
