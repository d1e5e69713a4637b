//! Channel fan-out for outgoing notifications.

use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use super::registry::ConnectionRegistry;
use super::types::{DevicePlatform, NotificationChannel, NotificationCreate, NotificationPayload, NotificationPriority};
use crate::config::NotificationsConfig;
use crate::store::{NewNotification, Store, StoreResult, User};

/// Result of one channel for one `send` call.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ChannelOutcome {
    pub delivered: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChannelOutcome {
    fn skipped(reason: &str) -> Self {
        Self {
            skipped: Some(reason.to_string()),
            ..Self::default()
        }
    }

    fn failed(error: impl ToString) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DeliveryReport {
    pub priority: NotificationPriority,
    pub channels: BTreeMap<NotificationChannel, ChannelOutcome>,
}

pub struct NotificationService {
    db: Arc<Mutex<Store>>,
    connections: Arc<ConnectionRegistry>,
    http: Client,
    config: NotificationsConfig,
}

impl NotificationService {
    pub fn new(
        db: Arc<Mutex<Store>>,
        connections: Arc<ConnectionRegistry>,
        http: Client,
        config: NotificationsConfig,
    ) -> Self {
        Self {
            db,
            connections,
            http,
            config,
        }
    }

    fn with_db<T>(&self, f: impl FnOnce(&Store) -> StoreResult<T>) -> Result<T, String> {
        let db = self.db.lock().map_err(|e| format!("Database lock error: {e}"))?;
        f(&*db).map_err(|e| e.to_string())
    }

    /// Deliver on every channel the request (or its type's defaults) names.
    /// Channels fail independently; nothing is retried.
    pub async fn send(&self, request: &NotificationCreate) -> DeliveryReport {
        let defaults = request.payload.kind.delivery();
        let priority = request.priority.unwrap_or(defaults.priority);
        let channels = request
            .channels
            .clone()
            .unwrap_or_else(|| defaults.channels.to_vec());

        let mut report = DeliveryReport {
            priority,
            channels: BTreeMap::new(),
        };
        // stored first so socket messages carry ids a client can ack
        let (stored, stored_ids) = if channels.contains(&NotificationChannel::InApp) {
            self.in_app(request, priority)
        } else {
            (ChannelOutcome::default(), HashMap::new())
        };
        let mut stored = Some(stored);
        for channel in channels {
            let outcome = match channel {
                NotificationChannel::Push => self.push(request, priority, None).await,
                NotificationChannel::Web => self.push(request, priority, Some(DevicePlatform::Web)).await,
                NotificationChannel::Websocket => self.websocket(request, &stored_ids),
                NotificationChannel::Email => self.email(request).await,
                NotificationChannel::Sms if priority == NotificationPriority::Urgent => self.sms(request).await,
                NotificationChannel::Sms => ChannelOutcome::skipped("sms is reserved for urgent notifications"),
                NotificationChannel::InApp => match stored.take() {
                    Some(outcome) => outcome,
                    None => continue,
                },
            };
            if let Some(error) = &outcome.error {
                warn!(channel = %channel, kind = %request.payload.kind, error = %error, "Notification channel failed");
            }
            report.channels.insert(channel, outcome);
        }
        debug!(kind = %request.payload.kind, recipients = request.recipient_ids.len(), "Notification sent");
        report
    }

    async fn push(
        &self,
        request: &NotificationCreate,
        priority: NotificationPriority,
        platform: Option<DevicePlatform>,
    ) -> ChannelOutcome {
        let Some(server_key) = self.config.fcm_server_key.as_deref() else {
            return ChannelOutcome::skipped("push is not configured");
        };
        let tokens = match self.with_db(|db| db.device_tokens_for(&request.recipient_ids)) {
            Ok(tokens) => tokens,
            Err(e) => return ChannelOutcome::failed(e),
        };
        let tokens: Vec<String> = tokens
            .into_iter()
            .filter(|t| platform.map_or(true, |p| t.platform == p))
            .map(|t| t.token)
            .collect();
        if tokens.is_empty() {
            return ChannelOutcome::skipped("no registered devices");
        }

        let body = fcm_message(&tokens, &request.payload, priority);
        let response = self
            .http
            .post(&self.config.fcm_url)
            .header("Authorization", format!("key={server_key}"))
            .json(&body)
            .send()
            .await;
        let response = match response {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => return ChannelOutcome::failed(format!("FCM returned HTTP {}", r.status())),
            Err(e) => return ChannelOutcome::failed(e),
        };
        match response.json::<Value>().await {
            Ok(result) => ChannelOutcome {
                delivered: result["success"].as_u64().unwrap_or(0) as usize,
                failed: result["failure"].as_u64().unwrap_or(0) as usize,
                ..ChannelOutcome::default()
            },
            Err(e) => ChannelOutcome::failed(e),
        }
    }

    /// Each recipient's message carries their stored notification id when
    /// the notification was also kept in-app.
    fn websocket(&self, request: &NotificationCreate, stored_ids: &HashMap<String, String>) -> ChannelOutcome {
        let payload = &request.payload;
        let timestamp = Utc::now().to_rfc3339();
        let mut outcome = ChannelOutcome::default();
        for user_id in &request.recipient_ids {
            let mut body = json!({
                "notification_type": payload.kind,
                "title": payload.title,
                "body": payload.body,
                "data": payload.data,
                "action_url": payload.action_url,
                "timestamp": timestamp,
            });
            if let Some(id) = stored_ids.get(user_id) {
                body["id"] = json!(id);
            }
            let message = json!({"type": "notification", "payload": body});
            outcome.delivered += self.connections.send_to_user(user_id, &message);
        }
        outcome
    }

    fn recipients(&self, request: &NotificationCreate) -> Result<Vec<User>, String> {
        self.with_db(|db| {
            let mut users = Vec::with_capacity(request.recipient_ids.len());
            for id in &request.recipient_ids {
                if let Some(user) = db.get_user(id)? {
                    users.push(user);
                }
            }
            Ok(users)
        })
    }

    async fn email(&self, request: &NotificationCreate) -> ChannelOutcome {
        let Some(relay) = self.config.email_relay_url.as_deref() else {
            return ChannelOutcome::skipped("email relay is not configured");
        };
        let users = match self.recipients(request) {
            Ok(users) => users,
            Err(e) => return ChannelOutcome::failed(e),
        };
        let mut outcome = ChannelOutcome::default();
        for user in users {
            let body = json!({
                "to": user.email,
                "subject": request.payload.title,
                "body": request.payload.body,
            });
            self.relay(relay, &body, &mut outcome).await;
        }
        outcome
    }

    async fn sms(&self, request: &NotificationCreate) -> ChannelOutcome {
        let Some(relay) = self.config.sms_relay_url.as_deref() else {
            return ChannelOutcome::skipped("sms relay is not configured");
        };
        let users = match self.recipients(request) {
            Ok(users) => users,
            Err(e) => return ChannelOutcome::failed(e),
        };
        let mut outcome = ChannelOutcome::default();
        for phone in users.into_iter().filter_map(|u| u.phone) {
            let body = json!({
                "to": phone,
                "body": format!("{}: {}", request.payload.title, request.payload.body),
            });
            self.relay(relay, &body, &mut outcome).await;
        }
        outcome
    }

    async fn relay(&self, url: &str, body: &Value, outcome: &mut ChannelOutcome) {
        match self.http.post(url).json(body).send().await {
            Ok(r) if r.status().is_success() => outcome.delivered += 1,
            Ok(r) => {
                outcome.failed += 1;
                outcome.error = Some(format!("relay returned HTTP {}", r.status()));
            }
            Err(e) => {
                outcome.failed += 1;
                outcome.error = Some(e.to_string());
            }
        }
    }

    /// Returns the outcome and the stored id per recipient.
    fn in_app(
        &self,
        request: &NotificationCreate,
        priority: NotificationPriority,
    ) -> (ChannelOutcome, HashMap<String, String>) {
        let payload = &request.payload;
        let data = Value::Object(payload.data.clone().into_iter().collect());
        let saved = self.with_db(|db| {
            let mut ids = HashMap::with_capacity(request.recipient_ids.len());
            for user_id in &request.recipient_ids {
                let id = db.insert_notification(&NewNotification {
                    user_id,
                    kind: payload.kind,
                    title: &payload.title,
                    body: &payload.body,
                    data: &data,
                    action_url: payload.action_url.as_deref(),
                    priority,
                })?;
                ids.insert(user_id.clone(), id);
            }
            Ok(ids)
        });
        match saved {
            Ok(ids) => (
                ChannelOutcome {
                    delivered: ids.len(),
                    ..ChannelOutcome::default()
                },
                ids,
            ),
            Err(e) => (ChannelOutcome::failed(e), HashMap::new()),
        }
    }
}

/// Legacy FCM HTTP body. Data values are flattened to strings.
fn fcm_message(tokens: &[String], payload: &NotificationPayload, priority: NotificationPriority) -> Value {
    let config = payload.kind.delivery();
    let mut data = Map::new();
    data.insert("type".into(), json!(payload.kind));
    data.insert("action_url".into(), json!(payload.action_url.clone().unwrap_or_default()));
    data.insert("click_action".into(), json!("FLUTTER_NOTIFICATION_CLICK"));
    for (key, value) in &payload.data {
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        data.insert(key.clone(), Value::String(text));
    }
    let urgent = matches!(priority, NotificationPriority::High | NotificationPriority::Urgent);

    json!({
        "registration_ids": tokens,
        "priority": if urgent { "high" } else { "normal" },
        "notification": {
            "title": format!("{} {}", config.icon, payload.title),
            "body": payload.body,
            "image": payload.image_url,
            "sound": config.sound,
            "android_channel_id": format!("roady_{priority}"),
        },
        "data": data,
    })
}
