use crate::{
    error::SocialError,
    queue::FlushReport,
    types::{ClientNotice, FeedSnapshot},
};

/// Convert an applied flush into the notices published for it.
///
/// Stale reports produce nothing; abandoned mutations are reported as one
/// `FlushAbandoned` carrying every terminal error.
pub fn notices_for_flush(report: &FlushReport) -> Vec<ClientNotice> {
    if report.stale {
        return Vec::new();
    }

    let mut notices = vec![ClientNotice::FlushCompleted {
        created: report.created.len(),
        deleted: report.deleted.len(),
        requeued: report.requeued,
    }];
    if !report.abandoned.is_empty() {
        notices.push(ClientNotice::FlushAbandoned {
            dropped: report.abandoned.len(),
            error: SocialError::multiple(report.abandoned.iter().cloned()),
        });
    }
    notices
}

pub fn feed_updated(snapshot: &FeedSnapshot) -> ClientNotice {
    ClientNotice::FeedUpdated {
        unread_count: snapshot.unread_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::{ClientErrorCode, EventErrorCode},
        types::Event,
    };

    #[test]
    fn maps_clean_flush_to_single_completion() {
        let report = FlushReport {
            created: vec![Event::new("like", "post1")],
            ..FlushReport::default()
        };

        assert_eq!(
            notices_for_flush(&report),
            vec![ClientNotice::FlushCompleted {
                created: 1,
                deleted: 0,
                requeued: 0,
            }]
        );
    }

    #[test]
    fn aggregates_abandoned_errors() {
        let report = FlushReport {
            abandoned: vec![
                SocialError::event(EventErrorCode::InvalidVisibility, "bad"),
                SocialError::event(EventErrorCode::TypeSize, "empty"),
            ],
            ..FlushReport::default()
        };

        let notices = notices_for_flush(&report);
        assert_eq!(notices.len(), 2);
        match &notices[1] {
            ClientNotice::FlushAbandoned { dropped, error } => {
                assert_eq!(*dropped, 2);
                assert!(matches!(
                    error,
                    SocialError::Multiple { errors } if errors.len() == 2
                ));
                assert_eq!(error.code(), Some(ClientErrorCode::MultipleErrors.code()));
            }
            other => panic!("unexpected notice: {other:?}"),
        }
    }

    #[test]
    fn stale_reports_are_silent() {
        assert!(notices_for_flush(&FlushReport::stale()).is_empty());
    }
}
