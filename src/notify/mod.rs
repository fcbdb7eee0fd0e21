// src/notify/mod.rs
//
// Push notifications are collected as plain data while an operation's
// transaction is open and dispatched only after it commits, so a sender
// fault can never affect durability of the state change.

use async_trait::async_trait;
use serde::Serialize;

use crate::models::UserRef;
use crate::store::Store;

pub const ACTION_OPEN_TICKET: &str = "OPEN_TICKET_DETAIL_PAGE";

#[derive(Debug, Clone, Serialize)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PushData {
    pub action: &'static str,
    pub issue_id: i64,
}

/// One queued notification, addressed by user rather than device token;
/// tokens are resolved at dispatch time.
#[derive(Debug, Clone)]
pub struct PushEvent {
    pub to: UserRef,
    pub message: PushMessage,
    pub issue_id: i64,
}

impl PushEvent {
    pub fn new(to: UserRef, title: impl Into<String>, body: impl Into<String>, issue_id: i64) -> Self {
        Self {
            to,
            message: PushMessage {
                title: title.into(),
                body: body.into(),
            },
            issue_id,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("push delivery failed: {0}")]
pub struct NotifyError(pub String);

#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send(
        &self,
        token: &str,
        message: &PushMessage,
        data: &PushData,
    ) -> Result<(), NotifyError>;
}

/// Delivers through an HTTP push gateway (FCM-style relay).
pub struct GatewaySender {
    client: reqwest::Client,
    endpoint: String,
}

impl GatewaySender {
    pub fn new(endpoint: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl PushSender for GatewaySender {
    async fn send(
        &self,
        token: &str,
        message: &PushMessage,
        data: &PushData,
    ) -> Result<(), NotifyError> {
        let payload = serde_json::json!({
            "token": token,
            "notification": message,
            "data": data,
        });
        self.client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError(e.to_string()))?
            .error_for_status()
            .map_err(|e| NotifyError(e.to_string()))?;
        Ok(())
    }
}

/// Sender for deployments without a push gateway configured.
pub struct NoopSender;

#[async_trait]
impl PushSender for NoopSender {
    async fn send(
        &self,
        _token: &str,
        message: &PushMessage,
        _data: &PushData,
    ) -> Result<(), NotifyError> {
        tracing::debug!(title = %message.title, "push gateway not configured, dropping notification");
        Ok(())
    }
}

/// Best-effort fan-out; failures are logged and swallowed.
pub async fn dispatch(store: &dyn Store, sender: &dyn PushSender, events: Vec<PushEvent>) {
    for event in events {
        let token = match store.device_token(event.to).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                tracing::debug!(user = ?event.to, "no device token registered, skipping push");
                continue;
            }
            Err(e) => {
                tracing::warn!(user = ?event.to, error = %e, "device token lookup failed");
                continue;
            }
        };
        let data = PushData {
            action: ACTION_OPEN_TICKET,
            issue_id: event.issue_id,
        };
        if let Err(e) = sender.send(&token, &event.message, &data).await {
            tracing::warn!(user = ?event.to, error = %e, "push notification failed");
        }
    }
}
