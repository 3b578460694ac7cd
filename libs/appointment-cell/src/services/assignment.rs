// libs/appointment-cell/src/services/assignment.rs
use rand::seq::SliceRandom;
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{Appointment, AppointmentError, Doctor, Service};
use crate::services::availability::AvailabilityChecker;

/// Picks a doctor for an unassigned appointment. Pure over its inputs apart
/// from the random tie-break and the availability lookups; persisting the
/// chosen doctor is the caller's job.
pub struct AssignmentResolver {
    availability: AvailabilityChecker,
}

impl AssignmentResolver {
    pub fn new(availability: AvailabilityChecker) -> Self {
        Self { availability }
    }

    pub async fn resolve(
        &self,
        appointment: &Appointment,
        services: &[Service],
    ) -> Result<Option<Doctor>, AppointmentError> {
        // Candidate set: union of qualified doctors across the booked lines.
        let mut candidates: HashMap<Uuid, Doctor> = HashMap::new();
        for service in services {
            for doctor in &service.doctors {
                candidates.entry(doctor.id).or_insert_with(|| doctor.clone());
            }
        }

        if candidates.is_empty() {
            warn!(
                "No qualified doctor for services requested by appointment {}",
                appointment.id
            );
            return Ok(None);
        }

        let mut available = Vec::new();
        for doctor in candidates.into_values() {
            if self
                .availability
                .is_available(doctor.id, appointment.start_time, appointment.end_time)
                .await?
            {
                available.push(doctor);
            }
        }

        if available.is_empty() {
            warn!(
                "All qualified doctors fully booked for appointment {} ({} - {})",
                appointment.id, appointment.start_time, appointment.end_time
            );
            return Ok(None);
        }

        // Uniform random pick among equally qualified, available doctors.
        let chosen = available
            .choose(&mut rand::thread_rng())
            .cloned();

        if let Some(ref doctor) = chosen {
            debug!(
                "Resolved doctor {} for appointment {}",
                doctor.id, appointment.id
            );
        }

        Ok(chosen)
    }
}
