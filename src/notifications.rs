//! Outbound notification queue.
//!
//! The control plane only enqueues payloads; delivery belongs to an external
//! mailer. The in-process dispatcher drains the queue and hands each payload
//! to the configured sink, which by default logs it.

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    PasswordReset { email: String, token: String },
    EmailVerification { email: String, token: String },
    OrganizationInvite {
        email: String,
        organization: String,
        role: String,
    },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::PasswordReset { .. } => "password_reset",
            Notification::EmailVerification { .. } => "email_verification",
            Notification::OrganizationInvite { .. } => "organization_invite",
        }
    }

    pub fn recipient(&self) -> &str {
        match self {
            Notification::PasswordReset { email, .. }
            | Notification::EmailVerification { email, .. }
            | Notification::OrganizationInvite { email, .. } => email,
        }
    }
}

/// Sending half of the bounded queue. Cloned into every service that notifies.
#[derive(Debug, Clone)]
pub struct NotificationQueue {
    tx: mpsc::Sender<Notification>,
}

impl NotificationQueue {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueue without waiting. A full or closed queue drops the payload.
    pub fn enqueue(&self, notification: Notification) {
        let kind = notification.kind();
        if let Err(err) = self.tx.try_send(notification) {
            metrics::counter!("notifications_dropped_total", "kind" => kind).increment(1);
            tracing::warn!(kind, error = %err, "notification dropped");
        }
    }
}

/// Drain `rx` until cancelled or every sender is gone.
pub fn spawn_dispatcher(
    mut rx: mpsc::Receiver<Notification>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                next = rx.recv() => match next {
                    Some(notification) => {
                        tracing::info!(
                            kind = notification.kind(),
                            recipient = notification.recipient(),
                            "notification ready for delivery"
                        );
                    }
                    None => break,
                },
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let (queue, mut rx) = NotificationQueue::channel(1);
        let first = Notification::PasswordReset {
            email: "a@example.com".into(),
            token: "t1".into(),
        };
        queue.enqueue(first.clone());
        queue.enqueue(Notification::PasswordReset {
            email: "b@example.com".into(),
            token: "t2".into(),
        });

        assert_eq!(rx.recv().await, Some(first));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dispatcher_stops_on_cancel() {
        let (_queue, rx) = NotificationQueue::channel(4);
        let shutdown = CancellationToken::new();
        let handle = spawn_dispatcher(rx, shutdown.clone());
        shutdown.cancel();
        handle.await.unwrap();
    }
}
