// libs/appointment-cell/src/services/appointment.rs
//
// Staff- and payment-driven transitions. Each operation is a single-row
// read, validate, write; notifications fire after the write and never undo it.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{Appointment, AppointmentError, AppointmentStatus, PaymentMethod};
use crate::notify::{NewNotification, NotificationKind, NotificationSink, Notifier};
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::stores::AppointmentStore;

pub struct AppointmentService {
    store: Arc<dyn AppointmentStore>,
    lifecycle: AppointmentLifecycleService,
    notifier: Arc<dyn Notifier>,
    notifications: Arc<dyn NotificationSink>,
}

impl AppointmentService {
    pub fn new(
        store: Arc<dyn AppointmentStore>,
        notifier: Arc<dyn Notifier>,
        notifications: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            store,
            lifecycle: AppointmentLifecycleService::new(),
            notifier,
            notifications,
        }
    }

    /// Staff accepts a pending booking.
    pub async fn confirm(&self, id: Uuid, staff_id: Uuid) -> Result<Appointment, AppointmentError> {
        let mut appointment = self.store.find_by_id(id).await?;
        self.lifecycle
            .validate_transition(appointment.status, AppointmentStatus::Confirmed)?;

        appointment.status = AppointmentStatus::Confirmed;
        appointment.staff_id = Some(staff_id);
        appointment.updated_at = Utc::now();
        self.store.save(&appointment).await?;

        info!("Appointment {} confirmed by staff {}", id, staff_id);
        self.notify(
            NotificationKind::AppointmentConfirmed,
            &appointment,
            "Appointment confirmed",
            "Your appointment has been confirmed. Please pay the deposit to secure your slot.",
        )
        .await;

        Ok(appointment)
    }

    pub async fn reject(&self, id: Uuid, reason: &str) -> Result<Appointment, AppointmentError> {
        let mut appointment = self.store.find_by_id(id).await?;
        self.lifecycle
            .validate_transition(appointment.status, AppointmentStatus::Rejected)?;

        appointment.status = AppointmentStatus::Rejected;
        appointment.rejection_reason = Some(reason.to_string());
        appointment.updated_at = Utc::now();
        self.store.save(&appointment).await?;

        info!("Appointment {} rejected: {}", id, reason);
        self.notify(
            NotificationKind::AppointmentRejected,
            &appointment,
            "Appointment rejected",
            reason,
        )
        .await;

        Ok(appointment)
    }

    pub async fn cancel(&self, id: Uuid, reason: &str) -> Result<Appointment, AppointmentError> {
        let mut appointment = self.store.find_by_id(id).await?;
        self.lifecycle
            .validate_transition(appointment.status, AppointmentStatus::Cancelled)?;

        appointment.cancel(reason, Utc::now());
        self.store.save(&appointment).await?;

        info!("Appointment {} cancelled: {}", id, reason);
        self.notify(
            NotificationKind::AppointmentCancelled,
            &appointment,
            "Appointment cancelled",
            reason,
        )
        .await;

        Ok(appointment)
    }

    /// Payment subsystem reports a deposit payment. The deposit is half the
    /// total; the invoice line itself is created by the payment collaborator.
    pub async fn record_deposit(
        &self,
        id: Uuid,
        order_code: Option<String>,
    ) -> Result<Appointment, AppointmentError> {
        let mut appointment = self.store.find_by_id(id).await?;
        self.lifecycle
            .validate_transition(appointment.status, AppointmentStatus::Deposited)?;

        appointment.status = AppointmentStatus::Deposited;
        appointment.deposit_amount = self.lifecycle.deposit_due(appointment.total_amount);
        if order_code.is_some() {
            appointment.order_code = order_code;
        }
        appointment.updated_at = Utc::now();
        self.store.save(&appointment).await?;

        info!(
            "Deposit of {} recorded for appointment {}",
            appointment.deposit_amount, id
        );
        self.notify(
            NotificationKind::DepositReceived,
            &appointment,
            "Deposit received",
            "Your deposit has been received. A doctor will be assigned shortly.",
        )
        .await;

        Ok(appointment)
    }

    pub async fn complete(&self, id: Uuid) -> Result<Appointment, AppointmentError> {
        let mut appointment = self.store.find_by_id(id).await?;
        self.lifecycle
            .validate_transition(appointment.status, AppointmentStatus::Completed)?;

        appointment.status = AppointmentStatus::Completed;
        appointment.updated_at = Utc::now();
        self.store.save(&appointment).await?;

        info!("Appointment {} completed", id);
        Ok(appointment)
    }

    /// Payment subsystem reports the final payment after completion.
    pub async fn record_final_payment(
        &self,
        id: Uuid,
        method: PaymentMethod,
    ) -> Result<Appointment, AppointmentError> {
        let mut appointment = self.store.find_by_id(id).await?;
        self.lifecycle
            .validate_transition(appointment.status, AppointmentStatus::Paid)?;

        appointment.status = AppointmentStatus::Paid;
        appointment.payment_method = Some(method);
        appointment.updated_at = Utc::now();
        self.store.save(&appointment).await?;

        info!("Final payment ({}) recorded for appointment {}", method, id);
        self.notify(
            NotificationKind::PaymentThankYou,
            &appointment,
            "Thank you",
            "Payment received in full. Thank you for visiting us!",
        )
        .await;

        Ok(appointment)
    }

    async fn notify(
        &self,
        kind: NotificationKind,
        appointment: &Appointment,
        title: &str,
        content: &str,
    ) {
        if let Err(e) = self
            .notifier
            .email(kind, appointment, serde_json::json!({ "message": content }))
            .await
        {
            warn!("Failed to send {} email for appointment {}: {}", kind, appointment.id, e);
        }

        let notification = NewNotification {
            title: title.to_string(),
            content: content.to_string(),
            kind,
            user_id: appointment.customer_id,
            user_type: "customer".to_string(),
            action_url: Some(format!("/appointments/{}", appointment.id)),
            related_id: Some(appointment.id),
            related_type: Some("appointment".to_string()),
        };
        if let Err(e) = self.notifications.create(notification).await {
            warn!(
                "Failed to create {} notification for appointment {}: {}",
                kind, appointment.id, e
            );
        }
    }
}
