// libs/appointment-cell/src/services/lifecycle.rs
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::models::{AppointmentError, AppointmentStatus};

/// Statuses the overdue sweep acts on: booked but not yet completed or paid.
pub const OVERDUE_CANDIDATE_STATUSES: [AppointmentStatus; 4] = [
    AppointmentStatus::Pending,
    AppointmentStatus::Confirmed,
    AppointmentStatus::Deposited,
    AppointmentStatus::Approved,
];

pub struct AppointmentLifecycleService;

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    /// Validate that a status transition is allowed
    pub fn validate_transition(
        &self,
        current_status: AppointmentStatus,
        new_status: AppointmentStatus,
    ) -> Result<(), AppointmentError> {
        debug!("Validating status transition from {} to {}", current_status, new_status);

        if !self.valid_transitions(current_status).contains(&new_status) {
            warn!("Invalid status transition attempted: {} -> {}", current_status, new_status);
            return Err(AppointmentError::InvalidStatusTransition(current_status));
        }

        Ok(())
    }

    /// All valid next statuses for a given current status
    pub fn valid_transitions(&self, current_status: AppointmentStatus) -> Vec<AppointmentStatus> {
        match current_status {
            AppointmentStatus::Pending => vec![
                AppointmentStatus::Confirmed,
                AppointmentStatus::Cancelled,
                AppointmentStatus::Rejected,
                AppointmentStatus::Overdue,
            ],
            AppointmentStatus::Confirmed => vec![
                AppointmentStatus::Deposited,
                AppointmentStatus::Cancelled,
                AppointmentStatus::Rejected,
                AppointmentStatus::Overdue,
            ],
            AppointmentStatus::Deposited => vec![
                AppointmentStatus::Approved,
                AppointmentStatus::Cancelled,
                AppointmentStatus::Rejected,
                AppointmentStatus::Overdue,
            ],
            AppointmentStatus::Approved => vec![
                AppointmentStatus::Completed,
                AppointmentStatus::Cancelled,
                AppointmentStatus::Rejected,
                AppointmentStatus::Overdue,
            ],
            AppointmentStatus::Completed => vec![
                AppointmentStatus::Paid,
                AppointmentStatus::Cancelled,
                AppointmentStatus::Rejected,
                AppointmentStatus::Overdue,
            ],
            // An overdue appointment can still be closed out by staff
            AppointmentStatus::Overdue => vec![
                AppointmentStatus::Completed,
                AppointmentStatus::Cancelled,
                AppointmentStatus::Rejected,
            ],
            // Terminal states - no transitions allowed
            AppointmentStatus::Paid => vec![],
            AppointmentStatus::Cancelled => vec![],
            AppointmentStatus::Rejected => vec![],
        }
    }

    pub fn is_terminal(&self, status: AppointmentStatus) -> bool {
        self.valid_transitions(status).is_empty()
    }

    /// Whether the overdue sweep should flip this appointment: still in a
    /// pre-completion status and past its start time by more than the grace
    /// window.
    pub fn should_mark_overdue(
        &self,
        current_status: AppointmentStatus,
        start_time: DateTime<Utc>,
        current_time: DateTime<Utc>,
        grace: Duration,
    ) -> bool {
        if !OVERDUE_CANDIDATE_STATUSES.contains(&current_status) {
            return false;
        }

        current_time > start_time + grace
    }

    /// Whether the deposit-timeout sweep should cancel this appointment:
    /// confirmed, no deposit recorded, and older than the timeout window.
    pub fn should_cancel_unpaid_deposit(
        &self,
        current_status: AppointmentStatus,
        deposit_amount: f64,
        created_at: DateTime<Utc>,
        current_time: DateTime<Utc>,
        timeout: Duration,
    ) -> bool {
        if current_status != AppointmentStatus::Confirmed {
            return false;
        }
        if deposit_amount > 0.0 {
            return false;
        }

        current_time > created_at + timeout
    }

    /// Deposit required to move Confirmed -> Deposited: half of the total.
    pub fn deposit_due(&self, total_amount: f64) -> f64 {
        total_amount * 0.5
    }
}

impl Default for AppointmentLifecycleService {
    fn default() -> Self {
        Self::new()
    }
}

/// Business rules for time-driven lifecycle sweeps
#[derive(Debug, Clone)]
pub struct LifecycleRules {
    pub overdue_grace: Duration,
    pub deposit_timeout: Duration,
}

impl Default for LifecycleRules {
    fn default() -> Self {
        Self {
            overdue_grace: Duration::hours(2),
            deposit_timeout: Duration::minutes(5),
        }
    }
}
