use std::time::Duration;

use social_core::{
    ClientErrorCode, ClientNotice, DeleteOutcome, DeleteRequest, Event, EventErrorCode, FeedSnapshot,
    FlushReport, ObjectRef, SocialError, UserErrorCode, feed_updated, notices_for_flush,
};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::client::{FlushBackoff, SocialClient, ensure_current, ticket_for};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushTrigger {
    Timer,
    Explicit,
}

impl SocialClient {
    /// Queue a new event for the next flush.
    ///
    /// The returned copy carries the local handle used to cancel or delete
    /// it before the service has assigned an id.
    pub fn create_event(&self, event: Event) -> Result<Event, SocialError> {
        let mut session = self.inner.session();
        let ticket = ticket_for(&mut session, "create_event")?;
        if let (Some(author), Some(current)) = (event.user_id.as_deref(), ticket.user_id.as_deref())
            && author != current
        {
            return Err(SocialError::client(
                ClientErrorCode::NoPermission,
                format!("cannot create events for user '{author}'"),
            ));
        }
        let queued = self.inner.queue().enqueue_create(event)?;
        trace!(event_type = %queued.event_type, "event queued");
        Ok(queued)
    }

    pub fn create_event_with_type(
        &self,
        event_type: impl Into<String>,
        object: impl Into<ObjectRef>,
    ) -> Result<Event, SocialError> {
        self.create_event(Event::new(event_type, object))
    }

    /// Delete an event, cancelling it locally when it was never sent.
    pub fn delete_event(&self, request: DeleteRequest) -> Result<DeleteOutcome, SocialError> {
        let mut session = self.inner.session();
        let ticket = ticket_for(&mut session, "delete_event")?;
        if let DeleteRequest::Event(event) = &request
            && let (Some(author), Some(current)) =
                (event.user_id.as_deref(), ticket.user_id.as_deref())
            && author != current
        {
            return Err(SocialError::client(
                ClientErrorCode::NoPermission,
                format!("cannot delete events of user '{author}'"),
            ));
        }
        let outcome = self.inner.queue().enqueue_delete(request)?;
        trace!(?outcome, "event delete queued");
        Ok(outcome)
    }

    pub fn pending_event_count(&self) -> usize {
        self.inner.queue().len()
    }

    pub fn flush_interval(&self) -> Duration {
        self.inner.scheduler.interval()
    }

    /// Change the automatic flush period. Zero disables automatic flushes;
    /// explicit [`flush`](Self::flush) calls keep working.
    pub fn set_flush_interval(&self, interval: Duration) {
        self.inner.scheduler.set_interval(interval);
        debug!(interval_ms = interval.as_millis() as u64, "flush interval changed");
    }

    /// Send every queued mutation now.
    ///
    /// Waits for an in-flight flush instead of running concurrently with it.
    pub async fn flush(&self) -> Result<FlushReport, SocialError> {
        self.run_flush(FlushTrigger::Explicit).await
    }

    pub(crate) async fn flush_on_timer(&self) {
        if let Err(err) = self.run_flush(FlushTrigger::Timer).await {
            trace!(error = %err, "timer flush skipped");
        }
    }

    async fn run_flush(&self, trigger: FlushTrigger) -> Result<FlushReport, SocialError> {
        let _flush_guard = match trigger {
            FlushTrigger::Explicit => self.inner.flush_lock.lock().await,
            FlushTrigger::Timer => match self.inner.flush_lock.try_lock() {
                Ok(guard) => guard,
                Err(_) => {
                    trace!("flush in flight; skipping timer tick");
                    return Ok(FlushReport::default());
                }
            },
        };

        if trigger == FlushTrigger::Timer {
            let deferred = self
                .inner
                .backoff()
                .not_before
                .is_some_and(|not_before| Instant::now() < not_before);
            if deferred {
                trace!("flush backing off; skipping timer tick");
                return Ok(FlushReport::default());
            }
        }

        let (ticket, batch) = {
            let mut session = self.inner.session();
            let ticket = ticket_for(&mut session, "flush")?;
            (ticket, self.inner.queue().take_batch())
        };
        let Some(batch) = batch else {
            return Ok(FlushReport::default());
        };

        let mutations = batch.mutations();
        debug!(mutations = mutations.len(), ?trigger, "flushing event queue");
        let result = self
            .inner
            .transport
            .submit_events(&ticket.token, &mutations)
            .await;

        let policy = self.inner.config.retry_policy;
        let (report, unread_count) = {
            let session = self.inner.session();
            if session.epoch != ticket.epoch {
                debug!("discarding flush results of an ended session");
                return Ok(FlushReport::stale());
            }

            let report = {
                let mut queue = self.inner.queue();
                match result {
                    Ok(outcomes) => queue.complete_batch(batch, outcomes, &policy),
                    Err(error) => queue.fail_batch(batch, error, &policy),
                }
            };

            let unread_count = if report.created.is_empty() && report.deleted.is_empty() {
                None
            } else {
                let mut feed = self.inner.feed_mut();
                if let Err(err) = feed.merge_sent(&report.created) {
                    warn!(error = %err, "could not merge sent events into the feed");
                }
                feed.apply_deletes(&report.deleted, ticket.user_id.as_deref());
                Some(feed.unread_count())
            };
            (report, unread_count)
        };

        self.record_flush_outcome(&report);
        self.inner.notices.emit_all(notices_for_flush(&report));
        if let Some(unread_count) = unread_count {
            self.inner
                .notices
                .emit(ClientNotice::FeedUpdated { unread_count });
        }
        Ok(report)
    }

    fn record_flush_outcome(&self, report: &FlushReport) {
        if report.stale {
            return;
        }
        let mut backoff = self.inner.backoff();
        if report.requeued == 0 {
            *backoff = FlushBackoff::default();
            return;
        }

        let delay = self
            .inner
            .config
            .retry_policy
            .delay_for_attempt(backoff.consecutive_failures, report.retry_after_ms);
        backoff.consecutive_failures = backoff.consecutive_failures.saturating_add(1);
        backoff.not_before = Some(Instant::now() + delay);
        info!(
            requeued = report.requeued,
            delay_ms = delay.as_millis() as u64,
            "flush failed; backing off"
        );
    }

    pub async fn retrieve_event(
        &self,
        event_id: &str,
        user_id: Option<&str>,
    ) -> Result<Event, SocialError> {
        if event_id.trim().is_empty() {
            return Err(SocialError::event(
                EventErrorCode::IdInvalid,
                "event id must not be empty",
            ));
        }
        if let Some(user_id) = user_id {
            validate_user_id(user_id)?;
        }
        let ticket = self.authenticated("retrieve_event")?;
        self.inner
            .transport
            .retrieve_event(&ticket.token, user_id, event_id)
            .await
    }

    pub async fn retrieve_events_for_current_user(&self) -> Result<Vec<Event>, SocialError> {
        let ticket = self.authenticated("retrieve_events")?;
        self.inner.transport.retrieve_events(&ticket.token, None).await
    }

    pub async fn retrieve_events_for_user(&self, user_id: &str) -> Result<Vec<Event>, SocialError> {
        validate_user_id(user_id)?;
        let ticket = self.authenticated("retrieve_events")?;
        self.inner
            .transport
            .retrieve_events(&ticket.token, Some(user_id))
            .await
    }

    /// Re-fetch the feed and replace the cache. On failure the cache is left
    /// as it was.
    pub async fn refresh_feed(&self) -> Result<FeedSnapshot, SocialError> {
        let ticket = self.authenticated("refresh_feed")?;
        let page = self.inner.transport.fetch_feed(&ticket.token).await?;
        let snapshot = {
            let session = self.inner.session();
            ensure_current(&session, &ticket, "refresh_feed")?;
            self.inner.feed_mut().replace_feed(page)
        };
        debug!(
            events = snapshot.events.len(),
            unread = snapshot.unread_count,
            "feed refreshed"
        );
        self.inner.notices.emit(feed_updated(&snapshot));
        Ok(snapshot)
    }

    pub async fn refresh_unread_feed(&self) -> Result<Vec<Event>, SocialError> {
        let ticket = self.authenticated("refresh_unread_feed")?;
        let events = self.inner.transport.fetch_unread_feed(&ticket.token).await?;
        let (unread, unread_count) = {
            let session = self.inner.session();
            ensure_current(&session, &ticket, "refresh_unread_feed")?;
            let mut feed = self.inner.feed_mut();
            let unread = feed.replace_unread(events);
            (unread, feed.unread_count())
        };
        self.inner
            .notices
            .emit(ClientNotice::FeedUpdated { unread_count });
        Ok(unread)
    }

    /// Ask the service for the unread count. When it differs from the cache
    /// the unread feed is re-fetched, so the cached count always matches the
    /// cached unread list.
    pub async fn refresh_unread_count(&self) -> Result<usize, SocialError> {
        let ticket = self.authenticated("refresh_unread_count")?;
        let reported = self
            .inner
            .transport
            .fetch_unread_count(&ticket.token)
            .await?;
        let cached = {
            let session = self.inner.session();
            ensure_current(&session, &ticket, "refresh_unread_count")?;
            self.inner.feed().unread_count()
        };
        if reported == cached {
            return Ok(cached);
        }

        debug!(reported, cached, "unread count changed; refreshing unread feed");
        Ok(self.refresh_unread_feed().await?.len())
    }

    /// Cached feed, most recent first. Empty until the first refresh.
    pub fn cached_feed(&self) -> Vec<Event> {
        self.inner.feed().events().to_vec()
    }

    pub fn cached_unread_feed(&self) -> Vec<Event> {
        self.inner.feed().unread_events().to_vec()
    }

    pub fn cached_unread_count(&self) -> usize {
        self.inner.feed().unread_count()
    }
}

pub(crate) fn validate_user_id(user_id: &str) -> Result<(), SocialError> {
    if user_id.trim().is_empty() {
        return Err(SocialError::user(
            UserErrorCode::IdInvalid,
            "user id must not be empty",
        ));
    }
    Ok(())
}
