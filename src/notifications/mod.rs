//! Multi-channel notifications and the realtime socket.
//!
//! Endpoints:
//! - POST /notifications/send - Fan out a notification (admin:users)
//! - POST /notifications/broadcast?project_id=&role= - Fan out to a group (admin:users)
//! - GET /notifications/{user_id} - Stored notifications and unread count
//! - POST /notifications/{id}/read - Mark one read
//! - POST /notifications/read-all - Mark all of the caller's read
//! - POST /devices/register - Register a push token
//! - DELETE /devices/{token} - Forget a push token
//! - GET /ws/notifications/{user_id}?token= - Websocket stream

mod handlers;
mod registry;
mod service;
mod types;
mod ws;

use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;

use crate::api::AppState;

pub use registry::ConnectionRegistry;
pub use service::{ChannelOutcome, DeliveryReport, NotificationService};
pub use types::{
    DeliveryConfig, DevicePlatform, NotificationChannel, NotificationCreate, NotificationPayload,
    NotificationPriority, NotificationType,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/notifications/send", post(handlers::send))
        .route("/notifications/broadcast", post(handlers::broadcast))
        .route("/notifications/read-all", post(handlers::mark_all_read))
        // `{id}` is the user id on GET and a notification id below
        .route("/notifications/{id}", get(handlers::list))
        .route("/notifications/{id}/read", post(handlers::mark_read))
        .route("/devices/register", post(handlers::register_device))
        .route("/devices/{token}", delete(handlers::unregister_device))
        .route("/ws/notifications/{user_id}", get(ws::notifications_socket))
}
