// libs/appointment-cell/src/notify.rs
//
// Outbound side effects fired after a persisted transition. Both channels are
// best-effort: a failure here is logged by the caller and never rolls the
// transition back.

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use shared_database::SupabaseClient;

use crate::models::{Appointment, AppointmentError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    DoctorAssigned,
    AppointmentOverdue,
    VoucherExpired,
    DepositTimeout,
    AppointmentConfirmed,
    AppointmentRejected,
    AppointmentCancelled,
    DepositReceived,
    PaymentThankYou,
    UpcomingReminder,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationKind::DoctorAssigned => write!(f, "doctor_assigned"),
            NotificationKind::AppointmentOverdue => write!(f, "appointment_overdue"),
            NotificationKind::VoucherExpired => write!(f, "voucher_expired"),
            NotificationKind::DepositTimeout => write!(f, "deposit_timeout"),
            NotificationKind::AppointmentConfirmed => write!(f, "appointment_confirmed"),
            NotificationKind::AppointmentRejected => write!(f, "appointment_rejected"),
            NotificationKind::AppointmentCancelled => write!(f, "appointment_cancelled"),
            NotificationKind::DepositReceived => write!(f, "deposit_received"),
            NotificationKind::PaymentThankYou => write!(f, "payment_thank_you"),
            NotificationKind::UpcomingReminder => write!(f, "upcoming_reminder"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNotification {
    pub title: String,
    pub content: String,
    pub kind: NotificationKind,
    pub user_id: Uuid,
    pub user_type: String,
    pub action_url: Option<String>,
    pub related_id: Option<Uuid>,
    pub related_type: Option<String>,
}

/// Outbound email, delegated to whatever transport the deployment wires in.
/// Template rendering and delivery retries belong to the implementation.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn email(
        &self,
        kind: NotificationKind,
        appointment: &Appointment,
        context: Value,
    ) -> Result<(), AppointmentError>;
}

/// In-app notification feed.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn create(&self, notification: NewNotification) -> Result<(), AppointmentError>;
}

/// Default email transport: structured log only. Deployments with a real
/// mailer swap this out at wiring time.
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn email(
        &self,
        kind: NotificationKind,
        appointment: &Appointment,
        context: Value,
    ) -> Result<(), AppointmentError> {
        info!(
            "Email [{}] for appointment {} (customer {}): {}",
            kind, appointment.id, appointment.customer_id, context
        );
        Ok(())
    }
}

pub struct SupabaseNotificationSink {
    supabase: Arc<SupabaseClient>,
    service_token: String,
}

impl SupabaseNotificationSink {
    pub fn new(supabase: Arc<SupabaseClient>, service_token: String) -> Self {
        Self { supabase, service_token }
    }
}

#[async_trait]
impl NotificationSink for SupabaseNotificationSink {
    async fn create(&self, notification: NewNotification) -> Result<(), AppointmentError> {
        let body = json!({
            "id": Uuid::new_v4(),
            "title": notification.title,
            "content": notification.content,
            "type": notification.kind,
            "user_id": notification.user_id,
            "user_type": notification.user_type,
            "action_url": notification.action_url,
            "related_id": notification.related_id,
            "related_type": notification.related_type,
            "created_at": chrono::Utc::now().to_rfc3339(),
        });

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let _result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/notifications",
                Some(&self.service_token),
                Some(body),
                Some(headers),
            )
            .await
            .map_err(|e| AppointmentError::NotificationError(e.to_string()))?;

        Ok(())
    }
}
