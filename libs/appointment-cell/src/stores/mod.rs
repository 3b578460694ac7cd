// libs/appointment-cell/src/stores/mod.rs
//
// Capability seams around persistence. The reconciliation jobs only ever see
// these traits; the PostgREST-backed implementations live in `supabase`.

pub mod supabase;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    Appointment, AppointmentError, AppointmentStatus, CustomerVoucher, Service, Voucher,
};

/// Status-set and time predicates for batch fetches. All fields optional;
/// an empty filter matches every non-deleted appointment.
#[derive(Debug, Clone, Default)]
pub struct AppointmentFilter {
    pub statuses: Vec<AppointmentStatus>,
    pub doctor_unassigned: bool,
    pub has_voucher: bool,
    pub zero_deposit: bool,
    pub starts_before: Option<DateTime<Utc>>,
    pub starts_within: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub created_before: Option<DateTime<Utc>>,
}

impl AppointmentFilter {
    pub fn with_statuses(statuses: &[AppointmentStatus]) -> Self {
        Self {
            statuses: statuses.to_vec(),
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait AppointmentStore: Send + Sync {
    /// Fetch up to `limit` matching appointments, oldest first.
    async fn find_batch(
        &self,
        filter: &AppointmentFilter,
        limit: usize,
    ) -> Result<Vec<Appointment>, AppointmentError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Appointment, AppointmentError>;

    /// All appointments for a doctor whose stored interval intersects the
    /// given window, regardless of status.
    async fn find_for_doctor_in_range(
        &self,
        doctor_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, AppointmentError>;

    /// Single-row read-modify-write; callers re-validate preconditions on the
    /// in-memory row immediately before saving.
    async fn save(&self, appointment: &Appointment) -> Result<(), AppointmentError>;
}

#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    /// The appointment's service lines with their qualified doctors embedded.
    async fn services_for(
        &self,
        appointment: &Appointment,
    ) -> Result<Vec<Service>, AppointmentError>;
}

#[async_trait]
pub trait VoucherStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Voucher>, AppointmentError>;
}

#[async_trait]
pub trait CustomerVoucherStore: Send + Sync {
    /// The used (reserved) voucher record backing an active appointment.
    async fn find_active(
        &self,
        customer_id: Uuid,
        voucher_id: Uuid,
    ) -> Result<Option<CustomerVoucher>, AppointmentError>;

    async fn mark_unused(&self, id: Uuid) -> Result<(), AppointmentError>;
}
