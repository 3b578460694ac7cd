// libs/appointment-cell/src/models.rs
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, NaiveDate, Utc};
use std::fmt;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub doctor_id: Option<Uuid>,
    pub staff_id: Option<Uuid>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Calendar anchor, denormalized from `start_time`.
    pub appointment_date: NaiveDate,
    pub total_amount: f64,
    pub deposit_amount: f64,
    pub order_code: Option<String>,
    pub voucher_id: Option<Uuid>,
    pub payment_method: Option<PaymentMethod>,
    pub status: AppointmentStatus,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub details: Vec<AppointmentDetail>,
}

impl Appointment {
    pub fn is_soft_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Active rows count against a doctor's availability.
    pub fn is_active(&self) -> bool {
        !self.is_soft_deleted()
            && !matches!(
                self.status,
                AppointmentStatus::Cancelled | AppointmentStatus::Rejected
            )
    }

    pub fn service_ids(&self) -> Vec<Uuid> {
        self.details.iter().map(|line| line.service_id).collect()
    }

    pub fn cancel(&mut self, reason: &str, now: DateTime<Utc>) {
        self.status = AppointmentStatus::Cancelled;
        self.cancelled_at = Some(now);
        self.cancel_reason = Some(reason.to_string());
        self.updated_at = now;
    }
}

/// One booked service line. `price` is a snapshot of the service price at
/// booking time and never changes afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentDetail {
    pub appointment_id: Uuid,
    pub service_id: Uuid,
    pub price: f64,
    pub quantity: i32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Deposited,
    Approved,
    Completed,
    Paid,
    Cancelled,
    Rejected,
    Overdue,
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Pending => write!(f, "pending"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::Deposited => write!(f, "deposited"),
            AppointmentStatus::Approved => write!(f, "approved"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Paid => write!(f, "paid"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::Rejected => write!(f, "rejected"),
            AppointmentStatus::Overdue => write!(f, "overdue"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    BankTransfer,
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentMethod::Cash => write!(f, "cash"),
            PaymentMethod::Card => write!(f, "card"),
            PaymentMethod::BankTransfer => write!(f, "bank_transfer"),
        }
    }
}

// ==============================================================================
// CAPABILITY MODELS (service -> qualified doctors, read-only input)
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub doctors: Vec<Doctor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Doctor {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub specialization: String,
}

impl Doctor {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

// ==============================================================================
// VOUCHER MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Voucher {
    pub id: Uuid,
    pub code: String,
    pub valid_to: DateTime<Utc>,
}

impl Voucher {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.valid_to < now
    }
}

/// A customer's hold on a voucher. Booking an appointment with a voucher
/// marks it used; cancelling that appointment releases it for reuse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerVoucher {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub voucher_id: Uuid,
    pub is_used: bool,
    pub used_at: Option<DateTime<Utc>>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum AppointmentError {
    #[error("Appointment not found")]
    NotFound,

    #[error("Appointment cannot be modified in current status: {0}")]
    InvalidStatusTransition(AppointmentStatus),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Notification error: {0}")]
    NotificationError(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),
}
