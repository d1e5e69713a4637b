//! Notification vocabulary and the per-type delivery table.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

string_enum! {
    pub enum NotificationType {
        ProjectCreated => "project_created",
        ProjectUpdated => "project_updated",
        ProjectMilestone => "project_milestone",
        ProjectDelayed => "project_delayed",
        TaskAssigned => "task_assigned",
        TaskCompleted => "task_completed",
        TaskOverdue => "task_overdue",
        TaskComment => "task_comment",
        RfiCreated => "rfi_created",
        RfiResponse => "rfi_response",
        RfiClosed => "rfi_closed",
        RfiUrgent => "rfi_urgent",
        ReportSubmitted => "report_submitted",
        ReportApproved => "report_approved",
        ReportRejected => "report_rejected",
        SstIncident => "sst_incident",
        SstInspection => "sst_inspection",
        SstAlert => "sst_alert",
        BudgetAlert => "budget_alert",
        InvoiceDue => "invoice_due",
        PaymentReceived => "payment_received",
        SystemMaintenance => "system_maintenance",
        SystemUpdate => "system_update",
    }
}

string_enum! {
    pub enum NotificationPriority {
        Low => "low",
        Normal => "normal",
        High => "high",
        Urgent => "urgent",
    }
}

string_enum! {
    pub enum NotificationChannel {
        Push => "push",
        Web => "web",
        InApp => "in_app",
        Email => "email",
        Sms => "sms",
        Websocket => "websocket",
    }
}

string_enum! {
    pub enum DevicePlatform {
        Ios => "ios",
        Android => "android",
        Web => "web",
    }
}

/// Delivery defaults for one notification type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeliveryConfig {
    pub priority: NotificationPriority,
    pub channels: &'static [NotificationChannel],
    pub icon: &'static str,
    pub sound: &'static str,
}

use NotificationChannel::*;

impl NotificationType {
    pub fn delivery(&self) -> DeliveryConfig {
        match self {
            NotificationType::SstIncident => DeliveryConfig {
                priority: NotificationPriority::Urgent,
                channels: &[Push, Sms, Websocket],
                icon: "🚨",
                sound: "emergency",
            },
            NotificationType::TaskAssigned => DeliveryConfig {
                priority: NotificationPriority::High,
                channels: &[Push, InApp],
                icon: "📋",
                sound: "default",
            },
            NotificationType::RfiUrgent => DeliveryConfig {
                priority: NotificationPriority::Urgent,
                channels: &[Push, Email, Websocket],
                icon: "❗",
                sound: "urgent",
            },
            NotificationType::ProjectMilestone => DeliveryConfig {
                priority: NotificationPriority::Normal,
                channels: &[Push, InApp],
                icon: "🎯",
                sound: "success",
            },
            NotificationType::BudgetAlert => DeliveryConfig {
                priority: NotificationPriority::High,
                channels: &[Push, Email],
                icon: "💰",
                sound: "alert",
            },
            _ => DeliveryConfig {
                priority: NotificationPriority::Normal,
                channels: &[InApp],
                icon: "🔔",
                sound: "default",
            },
        }
    }
}

/// Content shared by every channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationPayload {
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub action_url: Option<String>,
}

/// A send request. Priority and channels default from the type's table entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationCreate {
    pub recipient_ids: Vec<String>,
    pub payload: NotificationPayload,
    #[serde(default)]
    pub priority: Option<NotificationPriority>,
    #[serde(default)]
    pub channels: Option<Vec<NotificationChannel>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sst_incident_is_urgent_with_sms() {
        let config = NotificationType::SstIncident.delivery();
        assert_eq!(config.priority, NotificationPriority::Urgent);
        assert_eq!(config.channels, &[Push, Sms, Websocket]);
    }

    #[test]
    fn task_assigned_goes_to_push_and_in_app() {
        let config = NotificationType::TaskAssigned.delivery();
        assert_eq!(config.priority, NotificationPriority::High);
        assert_eq!(config.channels, &[Push, InApp]);
    }

    #[test]
    fn unlisted_types_default_to_in_app() {
        let config = NotificationType::ReportApproved.delivery();
        assert_eq!(config.priority, NotificationPriority::Normal);
        assert_eq!(config.channels, &[InApp]);
    }

    #[test]
    fn payload_uses_type_key_on_the_wire() {
        let payload: NotificationPayload = serde_json::from_value(serde_json::json!({
            "type": "budget_alert",
            "title": "Alerte Budget",
            "body": "80% du budget utilisé"
        }))
        .unwrap();

        assert_eq!(payload.kind, NotificationType::BudgetAlert);
        assert!(payload.data.is_empty());
    }

    #[test]
    fn knows_every_type() {
        assert_eq!(NotificationType::ALL.len(), 23);
    }
}
