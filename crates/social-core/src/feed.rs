use std::{cmp::Ordering, collections::HashSet};

use thiserror::Error;
use tracing::debug;

use crate::types::{Event, FeedPage, FeedSnapshot, RemoteDelete};

/// Errors that can occur while merging into the feed cache.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FeedMergeError {
    /// A sent event was merged before the service assigned it an id.
    #[error("sent event of type '{0}' has no server id")]
    MissingEventId(String),
}

/// Cached feed with its unread subset, most recent first.
#[derive(Debug, Clone)]
pub struct FeedCache {
    events: Vec<Event>,
    unread: Vec<Event>,
    max_items: usize,
}

impl FeedCache {
    /// Create an empty cache with an item cap (`max_items >= 1`).
    pub fn new(max_items: usize) -> Self {
        Self {
            events: Vec::new(),
            unread: Vec::new(),
            max_items: max_items.max(1),
        }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn unread_events(&self) -> &[Event] {
        &self.unread
    }

    /// Always equal to `unread_events().len()`.
    pub fn unread_count(&self) -> usize {
        self.unread.len()
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        FeedSnapshot {
            events: self.events.clone(),
            unread_count: self.unread_count(),
        }
    }

    /// Replace the whole feed with a fresh server page.
    ///
    /// The unread subset is derived from the per-event markers, so the
    /// reported count can never drift from the cached list.
    pub fn replace_feed(&mut self, page: FeedPage) -> FeedSnapshot {
        self.events = page.events;
        self.trim_to_max();
        self.unread = self
            .events
            .iter()
            .filter(|event| event.is_unread)
            .cloned()
            .collect();

        if page.unread_count != self.unread.len() {
            debug!(
                reported = page.unread_count,
                derived = self.unread.len(),
                "feed unread count differs from unread markers"
            );
        }
        self.snapshot()
    }

    /// Replace only the unread subset.
    ///
    /// Feed entries named by the new subset are marked unread; every other
    /// entry keeps its marker. Unread events missing from the feed are
    /// inserted so the subset always stays within the feed.
    pub fn replace_unread(&mut self, events: Vec<Event>) -> Vec<Event> {
        let mut seen = HashSet::new();
        let mut unread = Vec::with_capacity(events.len());
        for mut event in events {
            let Some(id) = event.id.clone() else {
                debug!(event_type = %event.event_type, "skipping unread event without id");
                continue;
            };
            if !seen.insert(id.clone()) {
                continue;
            }
            event.is_unread = true;

            let cached = self
                .events
                .iter()
                .position(|existing| existing.id.as_deref() == Some(id.as_str()));
            match cached {
                Some(pos) => self.events[pos].is_unread = true,
                None => self.insert_sorted(event.clone()),
            }
            unread.push(event);
        }

        self.unread = unread;
        self.trim_to_max();
        self.unread.clone()
    }

    /// Merge events acknowledged by the service into the feed.
    ///
    /// Every event must carry its server id; the cache is left untouched when
    /// one does not. Events already present are skipped. Returns the number
    /// of inserted events.
    pub fn merge_sent(&mut self, sent: &[Event]) -> Result<usize, FeedMergeError> {
        if let Some(missing) = sent.iter().find(|event| event.id.is_none()) {
            return Err(FeedMergeError::MissingEventId(missing.event_type.clone()));
        }

        let mut inserted = 0;
        for event in sent {
            if self.events.iter().any(|existing| existing.id == event.id) {
                continue;
            }
            let mut event = event.clone();
            event.is_unread = false;
            self.insert_sorted(event);
            inserted += 1;
        }

        self.trim_to_max();
        Ok(inserted)
    }

    /// Drop events removed remotely. Matching deletes only apply to events
    /// authored by `author_id`.
    pub fn apply_deletes(&mut self, deleted: &[RemoteDelete], author_id: Option<&str>) -> usize {
        let before = self.events.len();
        for target in deleted {
            let removes = |event: &Event| match target {
                RemoteDelete::EventId(id) => event.id.as_deref() == Some(id.as_str()),
                RemoteDelete::Matching {
                    event_type,
                    object_id,
                } => {
                    author_id.is_some()
                        && event.user_id.as_deref() == author_id
                        && event.matches(event_type, object_id)
                }
            };
            self.events.retain(|event| !removes(event));
            self.unread.retain(|event| !removes(event));
        }
        before - self.events.len()
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.unread.clear();
    }

    fn insert_sorted(&mut self, event: Event) {
        let pos = self
            .events
            .iter()
            .position(|existing| newest_first(&event, existing) == Ordering::Less)
            .unwrap_or(self.events.len());
        self.events.insert(pos, event);
    }

    fn trim_to_max(&mut self) {
        if self.events.len() <= self.max_items {
            return;
        }

        self.events.truncate(self.max_items);
        let kept: HashSet<&str> = self
            .events
            .iter()
            .filter_map(|event| event.id.as_deref())
            .collect();
        self.unread
            .retain(|event| event.id.as_deref().is_some_and(|id| kept.contains(id)));
    }
}

/// Most recent `created_at` first, then descending id; undated events last.
fn newest_first(a: &Event, b: &Event) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.id.cmp(&a.id))
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_731_000_000 + secs, 0)
            .single()
            .expect("valid timestamp")
    }

    fn event(id: &str, secs: i64, unread: bool) -> Event {
        Event {
            id: Some(id.to_owned()),
            user_id: Some("u2".into()),
            created_at: Some(at(secs)),
            is_unread: unread,
            ..Event::new("like", format!("post-{id}"))
        }
    }

    fn ids(events: &[Event]) -> Vec<&str> {
        events
            .iter()
            .filter_map(|event| event.id.as_deref())
            .collect()
    }

    #[test]
    fn never_populated_cache_is_empty() {
        let feed = FeedCache::new(10);
        assert!(feed.events().is_empty());
        assert!(feed.unread_events().is_empty());
        assert_eq!(feed.unread_count(), 0);
    }

    #[test]
    fn derives_unread_subset_from_markers() {
        let mut feed = FeedCache::new(50);
        let snapshot = feed.replace_feed(FeedPage {
            events: vec![
                event("e5", 5, true),
                event("e4", 4, false),
                event("e3", 3, true),
                event("e2", 2, false),
                event("e1", 1, false),
            ],
            unread_count: 2,
        });

        assert_eq!(snapshot.events.len(), 5);
        assert_eq!(snapshot.unread_count, 2);
        assert_eq!(ids(feed.unread_events()), vec!["e5", "e3"]);
        assert_eq!(ids(feed.events()), vec!["e5", "e4", "e3", "e2", "e1"]);
    }

    #[test]
    fn unread_count_follows_markers_when_server_count_disagrees() {
        let mut feed = FeedCache::new(50);
        feed.replace_feed(FeedPage {
            events: vec![event("e1", 1, true)],
            unread_count: 7,
        });
        assert_eq!(feed.unread_count(), feed.unread_events().len());
        assert_eq!(feed.unread_count(), 1);
    }

    #[test]
    fn narrow_unread_refresh_leaves_other_entries_alone() {
        let mut feed = FeedCache::new(50);
        feed.replace_feed(FeedPage {
            events: vec![event("e2", 2, true), event("e1", 1, false)],
            unread_count: 1,
        });

        let unread = feed.replace_unread(vec![event("e1", 1, false)]);
        assert_eq!(ids(&unread), vec!["e1"]);
        assert!(unread[0].is_unread);
        assert!(feed.events()[0].is_unread);
        assert!(feed.events()[1].is_unread);
        assert_eq!(ids(feed.events()), vec!["e2", "e1"]);
        assert_eq!(feed.unread_count(), 1);
    }

    #[test]
    fn unseen_unread_events_join_the_feed() {
        let mut feed = FeedCache::new(50);
        feed.replace_feed(FeedPage {
            events: vec![event("e2", 2, true), event("e1", 1, false)],
            unread_count: 1,
        });

        let unread = feed.replace_unread(vec![event("e9", 9, false), event("e9", 9, false)]);
        assert_eq!(ids(&unread), vec!["e9"]);
        assert_eq!(ids(feed.events()), vec!["e9", "e2", "e1"]);
        assert!(feed.events()[0].is_unread);
        assert!(feed.events()[1].is_unread);
        for event in feed.unread_events() {
            assert!(feed.events().iter().any(|cached| cached.id == event.id));
        }
    }

    #[test]
    fn unread_refresh_respects_item_cap() {
        let mut feed = FeedCache::new(2);
        feed.replace_feed(FeedPage {
            events: vec![event("e3", 3, false), event("e2", 2, false)],
            unread_count: 0,
        });

        let unread = feed.replace_unread(vec![event("e9", 9, false), event("e1", 1, false)]);
        assert_eq!(ids(feed.events()), vec!["e9", "e3"]);
        assert_eq!(ids(&unread), vec!["e9"]);
        assert_eq!(feed.unread_count(), 1);
    }

    #[test]
    fn unread_events_without_ids_are_skipped() {
        let mut feed = FeedCache::new(50);
        let unread = feed.replace_unread(vec![Event::new("share", "post9"), event("e1", 1, false)]);
        assert_eq!(ids(&unread), vec!["e1"]);
        assert_eq!(ids(feed.events()), vec!["e1"]);
    }

    #[test]
    fn merges_sent_events_by_creation_time_without_duplicates() {
        let mut feed = FeedCache::new(50);
        feed.replace_feed(FeedPage {
            events: vec![event("e4", 40, false), event("e1", 10, true)],
            unread_count: 1,
        });

        let inserted = feed
            .merge_sent(&[event("e3", 30, true), event("e4", 40, false), event("e9", 90, false)])
            .expect("merge should work");
        assert_eq!(inserted, 2);
        assert_eq!(ids(feed.events()), vec!["e9", "e4", "e3", "e1"]);
        assert!(!feed.events()[2].is_unread);
        assert_eq!(feed.unread_count(), 1);
    }

    #[test]
    fn merge_ties_break_on_id() {
        let mut feed = FeedCache::new(50);
        feed.merge_sent(&[event("a", 5, false), event("b", 5, false)])
            .expect("merge should work");
        assert_eq!(ids(feed.events()), vec!["b", "a"]);
    }

    #[test]
    fn rejects_merge_of_events_without_ids() {
        let mut feed = FeedCache::new(50);
        let err = feed
            .merge_sent(&[event("e1", 1, false), Event::new("share", "post9")])
            .expect_err("events without id must be rejected");
        assert_eq!(err, FeedMergeError::MissingEventId("share".into()));
        assert!(feed.events().is_empty());
    }

    #[test]
    fn trims_oldest_when_over_max_items() {
        let mut feed = FeedCache::new(2);
        feed.replace_feed(FeedPage {
            events: vec![
                event("e3", 3, false),
                event("e2", 2, false),
                event("e1", 1, true),
            ],
            unread_count: 1,
        });
        assert_eq!(ids(feed.events()), vec!["e3", "e2"]);
        assert_eq!(feed.unread_count(), 0);
    }

    #[test]
    fn applies_remote_deletes() {
        let mut feed = FeedCache::new(50);
        let mut own = event("e2", 2, true);
        own.user_id = Some("me".into());
        feed.replace_feed(FeedPage {
            events: vec![event("e3", 3, false), own, event("e1", 1, false)],
            unread_count: 1,
        });

        let removed = feed.apply_deletes(
            &[
                RemoteDelete::EventId("e3".into()),
                RemoteDelete::Matching {
                    event_type: "like".into(),
                    object_id: "post-e2".into(),
                },
                RemoteDelete::Matching {
                    event_type: "like".into(),
                    object_id: "post-e1".into(),
                },
            ],
            Some("me"),
        );
        assert_eq!(removed, 2);
        assert_eq!(ids(feed.events()), vec!["e1"]);
        assert_eq!(feed.unread_count(), 0);
    }

    #[test]
    fn clear_empties_everything() {
        let mut feed = FeedCache::new(50);
        feed.replace_feed(FeedPage {
            events: vec![event("e1", 1, true)],
            unread_count: 1,
        });
        feed.clear();
        assert!(feed.snapshot().events.is_empty());
        assert_eq!(feed.unread_count(), 0);
    }
}
