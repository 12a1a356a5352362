use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use super::{Admins, RequestHandler, Service, ServiceError};
use crate::repositories::{Messenger, UserStore};

const BROADCAST_CONCURRENCY: usize = 16;

pub enum NotificationRequest {
    /// Best-effort delivery; failures are only logged.
    Send { chat_id: i64, text: String },
    /// Delivery whose outcome the caller wants to know. Failures are
    /// logged and reported as `false`, never as an error.
    Deliver {
        chat_id: i64,
        text: String,
        response: oneshot::Sender<Result<bool, ServiceError>>,
    },
    Broadcast {
        text: String,
        response: oneshot::Sender<Result<BroadcastReport, ServiceError>>,
    },
    NotifyAdmins { text: String },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    pub sent: usize,
    pub failed: usize,
}

/// Queues a best-effort message. A full or closed queue is logged and ignored.
pub(crate) async fn send_and_forget(
    channel: &mpsc::Sender<NotificationRequest>,
    chat_id: i64,
    text: String,
) {
    let _ = channel
        .send(NotificationRequest::Send { chat_id, text })
        .await
        .map_err(|e| {
            log::warn!("Failed to queue notification for {}: {}", chat_id, e);
        });
}

#[derive(Clone)]
pub struct NotificationRequestHandler {
    messenger: Arc<dyn Messenger>,
    users: Arc<dyn UserStore>,
    admins: Admins,
}

impl NotificationRequestHandler {
    pub fn new(messenger: Arc<dyn Messenger>, users: Arc<dyn UserStore>, admins: Admins) -> Self {
        Self {
            messenger,
            users,
            admins,
        }
    }

    async fn send(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.messenger.send_message(chat_id, text).await {
            log::warn!("Could not deliver message to {}: {}", chat_id, e);
        }
    }

    async fn deliver(&self, chat_id: i64, text: &str) -> bool {
        match self.messenger.send_message(chat_id, text).await {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Could not deliver message to {}: {}", chat_id, e);
                false
            }
        }
    }

    async fn broadcast(&self, text: &str) -> Result<BroadcastReport, ServiceError> {
        let recipients = self
            .users
            .list_recipients()
            .await
            .map_err(ServiceError::database)?;

        let report = stream::iter(recipients)
            .map(|chat_id| async move { self.messenger.send_message(chat_id, text).await })
            .buffer_unordered(BROADCAST_CONCURRENCY)
            .fold(BroadcastReport::default(), |mut report, result| async move {
                match result {
                    Ok(()) => report.sent += 1,
                    Err(_) => report.failed += 1,
                }
                report
            })
            .await;

        log::info!(
            "Broadcast finished: {} sent, {} failed.",
            report.sent,
            report.failed
        );
        Ok(report)
    }

    async fn notify_admins(&self, text: &str) {
        for admin_id in self.admins.ids() {
            self.send(admin_id, text).await;
        }
    }
}

#[async_trait]
impl RequestHandler<NotificationRequest> for NotificationRequestHandler {
    async fn handle_request(&self, request: NotificationRequest) {
        match request {
            NotificationRequest::Send { chat_id, text } => {
                self.send(chat_id, &text).await;
            }
            NotificationRequest::Deliver {
                chat_id,
                text,
                response,
            } => {
                let delivered = self.deliver(chat_id, &text).await;
                let _ = response.send(Ok(delivered));
            }
            NotificationRequest::Broadcast { text, response } => {
                let result = self.broadcast(&text).await;
                let _ = response.send(result);
            }
            NotificationRequest::NotifyAdmins { text } => {
                self.notify_admins(&text).await;
            }
        }
    }
}

pub struct NotificationService;

impl NotificationService {
    pub fn new() -> Self {
        NotificationService {}
    }
}

#[async_trait]
impl Service<NotificationRequest, NotificationRequestHandler> for NotificationService {}
