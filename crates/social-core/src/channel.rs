use tokio::sync::broadcast;

use crate::types::ClientNotice;

/// Broadcast notice stream handed to subscribers.
pub type NoticeStream = broadcast::Receiver<ClientNotice>;

/// Fan-out channel for background notices of one client context.
#[derive(Clone, Debug)]
pub struct NoticeChannel {
    notice_tx: broadcast::Sender<ClientNotice>,
}

impl NoticeChannel {
    pub fn new(buffer: usize) -> Self {
        let (notice_tx, _) = broadcast::channel(buffer.max(1));
        Self { notice_tx }
    }

    pub fn subscribe(&self) -> NoticeStream {
        self.notice_tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.notice_tx.receiver_count()
    }

    /// Emit a notice to all subscribers.
    ///
    /// Emission is best-effort; lagged subscribers are handled by `broadcast`.
    pub fn emit(&self, notice: ClientNotice) {
        let _ = self.notice_tx.send(notice);
    }

    pub fn emit_all(&self, notices: impl IntoIterator<Item = ClientNotice>) {
        for notice in notices {
            self.emit(notice);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SessionState;

    #[tokio::test]
    async fn fans_out_notices_to_subscribers() {
        let channel = NoticeChannel::new(16);
        let mut a = channel.subscribe();
        let mut b = channel.subscribe();
        assert_eq!(channel.subscriber_count(), 2);

        channel.emit(ClientNotice::SessionChanged {
            state: SessionState::LoggedIn,
        });

        let notice_a = a.recv().await.expect("subscriber a should receive notice");
        let notice_b = b.recv().await.expect("subscriber b should receive notice");
        assert_eq!(notice_a, notice_b);
    }

    #[test]
    fn emitting_without_subscribers_is_a_no_op() {
        let channel = NoticeChannel::new(0);
        channel.emit_all([
            ClientNotice::FeedUpdated { unread_count: 1 },
            ClientNotice::FeedUpdated { unread_count: 2 },
        ]);
        assert_eq!(channel.subscriber_count(), 0);
    }
}
