// libs/appointment-cell/src/services/availability.rs
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::models::AppointmentError;
use crate::stores::AppointmentStore;

/// Half-open interval intersection. This is the single overlap test used for
/// every conflict decision in the system; an off-by-one here silently
/// double-books a doctor.
pub fn intervals_overlap(
    start_a: DateTime<Utc>,
    end_a: DateTime<Utc>,
    start_b: DateTime<Utc>,
    end_b: DateTime<Utc>,
) -> bool {
    start_a < end_b && start_b < end_a
}

pub struct AvailabilityChecker {
    store: Arc<dyn AppointmentStore>,
}

impl AvailabilityChecker {
    pub fn new(store: Arc<dyn AppointmentStore>) -> Self {
        Self { store }
    }

    /// True iff the doctor has zero active bookings overlapping the window.
    pub async fn is_available(
        &self,
        doctor_id: Uuid,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Result<bool, AppointmentError> {
        debug!(
            "Checking availability for doctor {} from {} to {}",
            doctor_id, start_time, end_time
        );

        let existing = self
            .store
            .find_for_doctor_in_range(doctor_id, start_time, end_time)
            .await?;

        let conflicts = existing
            .iter()
            .filter(|appointment| appointment.is_active())
            .filter(|appointment| {
                intervals_overlap(
                    appointment.start_time,
                    appointment.end_time,
                    start_time,
                    end_time,
                )
            })
            .count();

        Ok(conflicts == 0)
    }
}
