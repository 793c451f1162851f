//! Notification delivery plumbing.

use async_trait::async_trait;
use futures::future::join_all;

use crate::tracing::prelude::*;

use super::AlertMessage;

/// Errors raised while delivering a notification.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// A required environment variable is absent.
    #[error("missing credentials: {0} is not set")]
    MissingCredentials(&'static str),

    #[error("no recipients configured")]
    NoRecipients,

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("relay rejected the message: {status}")]
    Rejected { status: reqwest::StatusCode },

    #[error("no recipient accepted the message")]
    AllRecipientsFailed,
}

/// A way to reach the operator.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Short channel name for logs.
    fn name(&self) -> &'static str;

    async fn deliver(&self, message: &AlertMessage) -> Result<(), ChannelError>;
}

/// Result of fanning one message out to every channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchOutcome {
    pub attempted: usize,
    pub delivered: usize,
}

impl DispatchOutcome {
    pub fn any_delivered(&self) -> bool {
        self.delivered > 0
    }
}

/// Fans alert messages out to every configured channel concurrently.
///
/// Channel failures are logged and counted, never propagated; one deaf
/// channel must not silence the others.
pub struct Dispatcher {
    channels: Vec<Box<dyn NotificationChannel>>,
}

impl Dispatcher {
    pub fn new(channels: Vec<Box<dyn NotificationChannel>>) -> Self {
        Self { channels }
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub async fn dispatch(&self, message: &AlertMessage) -> DispatchOutcome {
        let deliveries = self.channels.iter().map(|channel| async move {
            match channel.deliver(message).await {
                Ok(()) => {
                    info!(
                        channel = channel.name(),
                        machine = %message.machine_id,
                        "Notification delivered"
                    );
                    true
                }
                Err(error) => {
                    error!(
                        channel = channel.name(),
                        machine = %message.machine_id,
                        %error,
                        "Notification failed"
                    );
                    false
                }
            }
        });

        let results = join_all(deliveries).await;
        DispatchOutcome {
            attempted: results.len(),
            delivered: results.into_iter().filter(|&ok| ok).count(),
        }
    }
}
