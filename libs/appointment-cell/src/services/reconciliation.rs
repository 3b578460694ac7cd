// libs/appointment-cell/src/services/reconciliation.rs
//
// Timer-driven reconciliation over the appointment table. Four jobs correct
// or advance state as time passes (doctor assignment, overdue detection,
// voucher-expiry cancellation, deposit-timeout cancellation); a fifth sends
// upcoming-appointment reminders without touching state. Jobs share nothing
// but the clock: each owns its own re-entrancy guard and bounded batch.

use chrono::{Duration, Utc};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use shared_config::SchedulerConfig;

use crate::models::{Appointment, AppointmentError, AppointmentStatus, Doctor};
use crate::notify::{NewNotification, NotificationKind, NotificationSink, Notifier};
use crate::services::assignment::AssignmentResolver;
use crate::services::availability::AvailabilityChecker;
use crate::services::lifecycle::{AppointmentLifecycleService, OVERDUE_CANDIDATE_STATUSES};
use crate::stores::{
    AppointmentFilter, AppointmentStore, CapabilityProvider, CustomerVoucherStore, VoucherStore,
};

const REMINDER_BATCH_SIZE: usize = 100;

pub const DEPOSIT_TIMEOUT_REASON: &str = "Deposit not paid within the allowed time";
pub const VOUCHER_EXPIRED_REASON: &str = "Voucher expired before the appointment took place";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconciliationJob {
    AssignDoctors,
    OverdueSweep,
    VoucherExpiry,
    DepositTimeout,
    UpcomingReminder,
}

impl ReconciliationJob {
    fn index(self) -> usize {
        match self {
            ReconciliationJob::AssignDoctors => 0,
            ReconciliationJob::OverdueSweep => 1,
            ReconciliationJob::VoucherExpiry => 2,
            ReconciliationJob::DepositTimeout => 3,
            ReconciliationJob::UpcomingReminder => 4,
        }
    }
}

impl fmt::Display for ReconciliationJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconciliationJob::AssignDoctors => write!(f, "doctor_assignment"),
            ReconciliationJob::OverdueSweep => write!(f, "overdue_detection"),
            ReconciliationJob::VoucherExpiry => write!(f, "voucher_expiry"),
            ReconciliationJob::DepositTimeout => write!(f, "deposit_timeout"),
            ReconciliationJob::UpcomingReminder => write!(f, "upcoming_reminder"),
        }
    }
}

/// Mutual exclusion over a named job. The in-process implementation is enough
/// for a single scheduler instance; a multi-instance deployment can swap in a
/// database advisory lock or lease without touching job logic.
pub trait JobGuard: Send + Sync {
    fn try_acquire(&self, job: ReconciliationJob) -> bool;
    fn release(&self, job: ReconciliationJob);
}

pub struct InProcessJobGuard {
    flags: [AtomicBool; 5],
}

impl InProcessJobGuard {
    pub fn new() -> Self {
        Self {
            flags: Default::default(),
        }
    }
}

impl Default for InProcessJobGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl JobGuard for InProcessJobGuard {
    fn try_acquire(&self, job: ReconciliationJob) -> bool {
        self.flags[job.index()]
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn release(&self, job: ReconciliationJob) {
        self.flags[job.index()].store(false, Ordering::Release);
    }
}

pub struct ReconciliationScheduler {
    store: Arc<dyn AppointmentStore>,
    capabilities: Arc<dyn CapabilityProvider>,
    vouchers: Arc<dyn VoucherStore>,
    customer_vouchers: Arc<dyn CustomerVoucherStore>,
    notifier: Arc<dyn Notifier>,
    notifications: Arc<dyn NotificationSink>,
    resolver: AssignmentResolver,
    lifecycle: AppointmentLifecycleService,
    guard: Arc<dyn JobGuard>,
    config: SchedulerConfig,
}

impl ReconciliationScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn AppointmentStore>,
        capabilities: Arc<dyn CapabilityProvider>,
        vouchers: Arc<dyn VoucherStore>,
        customer_vouchers: Arc<dyn CustomerVoucherStore>,
        notifier: Arc<dyn Notifier>,
        notifications: Arc<dyn NotificationSink>,
        config: SchedulerConfig,
    ) -> Self {
        let resolver = AssignmentResolver::new(AvailabilityChecker::new(Arc::clone(&store)));
        Self {
            store,
            capabilities,
            vouchers,
            customer_vouchers,
            notifier,
            notifications,
            resolver,
            lifecycle: AppointmentLifecycleService::new(),
            guard: Arc::new(InProcessJobGuard::new()),
            config,
        }
    }

    pub fn with_guard(mut self, guard: Arc<dyn JobGuard>) -> Self {
        self.guard = guard;
        self
    }

    /// Spawn one independent interval loop per job. Loops log tick failures
    /// and keep running; they stop only when the returned handles are aborted
    /// or the runtime shuts down.
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        info!("Starting reconciliation scheduler");

        let jobs = [
            (ReconciliationJob::AssignDoctors, self.config.assign_tick_seconds),
            (ReconciliationJob::OverdueSweep, self.config.overdue_tick_seconds),
            (ReconciliationJob::VoucherExpiry, self.config.voucher_tick_seconds),
            (ReconciliationJob::DepositTimeout, self.config.deposit_tick_seconds),
            (ReconciliationJob::UpcomingReminder, self.config.reminder_tick_seconds),
        ];

        jobs.into_iter()
            .map(|(job, tick_seconds)| {
                let scheduler = Arc::clone(self);
                tokio::spawn(async move {
                    let mut interval =
                        tokio::time::interval(std::time::Duration::from_secs(tick_seconds));
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    loop {
                        interval.tick().await;
                        if let Err(e) = scheduler.run_tick(job).await {
                            error!("{} tick failed: {}", job, e);
                        }
                    }
                })
            })
            .collect()
    }

    /// Run one guarded tick of the given job. A tick that finds the guard
    /// held is skipped entirely: no fetch, no writes.
    pub async fn run_tick(&self, job: ReconciliationJob) -> Result<usize, AppointmentError> {
        if !self.guard.try_acquire(job) {
            warn!("Skipping {} tick: previous run still in progress", job);
            return Ok(0);
        }

        let result = match job {
            ReconciliationJob::AssignDoctors => self.assign_pass().await,
            ReconciliationJob::OverdueSweep => self.overdue_pass().await,
            ReconciliationJob::VoucherExpiry => self.voucher_expiry_pass().await,
            ReconciliationJob::DepositTimeout => self.deposit_timeout_pass().await,
            ReconciliationJob::UpcomingReminder => self.reminder_pass().await,
        };

        self.guard.release(job);
        result
    }

    // ==========================================================================
    // JOB 1: DOCTOR ASSIGNMENT
    // ==========================================================================

    #[instrument(skip(self))]
    async fn assign_pass(&self) -> Result<usize, AppointmentError> {
        let filter = AppointmentFilter {
            statuses: vec![AppointmentStatus::Deposited],
            doctor_unassigned: true,
            ..AppointmentFilter::default()
        };
        let batch = self
            .store
            .find_batch(&filter, self.config.assign_batch_size)
            .await?;

        let mut assigned = 0;
        for appointment in batch {
            // A staff member may have assigned manually between fetch and now.
            if appointment.doctor_id.is_some() {
                continue;
            }

            let id = appointment.id;
            match self.assign_one(appointment).await {
                Ok(true) => assigned += 1,
                Ok(false) => {}
                Err(e) => {
                    // One bad row must never stop assignment for the rest.
                    error!("Doctor assignment failed for appointment {}: {}", id, e);
                }
            }
        }

        if assigned > 0 {
            info!("Assigned doctors to {} appointments", assigned);
        }
        Ok(assigned)
    }

    async fn assign_one(&self, mut appointment: Appointment) -> Result<bool, AppointmentError> {
        let services = self.capabilities.services_for(&appointment).await?;
        let doctor = match self.resolver.resolve(&appointment, &services).await? {
            Some(doctor) => doctor,
            None => return Ok(false),
        };

        appointment.doctor_id = Some(doctor.id);
        appointment.updated_at = Utc::now();
        self.store.save(&appointment).await?;

        info!(
            "Assigned doctor {} to appointment {}",
            doctor.id, appointment.id
        );
        self.notify_doctor_assigned(&appointment, &doctor).await;
        Ok(true)
    }

    async fn notify_doctor_assigned(&self, appointment: &Appointment, doctor: &Doctor) {
        let content = format!(
            "{} ({}) will take care of your appointment.",
            doctor.full_name(),
            doctor.specialization
        );
        let context = serde_json::json!({
            "doctor_name": doctor.full_name(),
            "specialization": doctor.specialization,
        });
        self.notify_customer(
            NotificationKind::DoctorAssigned,
            appointment,
            "Doctor assigned",
            &content,
            context,
        )
        .await;
    }

    // ==========================================================================
    // JOB 2: OVERDUE DETECTION
    // ==========================================================================

    #[instrument(skip(self))]
    async fn overdue_pass(&self) -> Result<usize, AppointmentError> {
        let now = Utc::now();
        let grace = Duration::minutes(self.config.overdue_grace_minutes);
        let filter = AppointmentFilter {
            statuses: OVERDUE_CANDIDATE_STATUSES.to_vec(),
            starts_before: Some(now - grace),
            ..AppointmentFilter::default()
        };
        let batch = self
            .store
            .find_batch(&filter, self.config.overdue_batch_size)
            .await?;

        let mut flipped = 0;
        for mut appointment in batch {
            // Re-validate at write time; the row may have moved on since the
            // fetch.
            if !self.lifecycle.should_mark_overdue(
                appointment.status,
                appointment.start_time,
                now,
                grace,
            ) {
                continue;
            }

            appointment.status = AppointmentStatus::Overdue;
            appointment.updated_at = now;
            match self.store.save(&appointment).await {
                Ok(()) => {
                    flipped += 1;
                    info!("Appointment {} marked overdue", appointment.id);
                    self.notify_customer(
                        NotificationKind::AppointmentOverdue,
                        &appointment,
                        "Appointment overdue",
                        "Your appointment start time has passed. Please contact us to rebook.",
                        serde_json::json!({ "start_time": appointment.start_time }),
                    )
                    .await;
                }
                Err(e) => {
                    error!("Failed to mark appointment {} overdue: {}", appointment.id, e);
                }
            }
        }

        Ok(flipped)
    }

    // ==========================================================================
    // JOB 3: VOUCHER-EXPIRY CANCELLATION
    // ==========================================================================

    #[instrument(skip(self))]
    async fn voucher_expiry_pass(&self) -> Result<usize, AppointmentError> {
        let filter = AppointmentFilter {
            statuses: vec![AppointmentStatus::Pending, AppointmentStatus::Confirmed],
            has_voucher: true,
            ..AppointmentFilter::default()
        };
        let batch = self
            .store
            .find_batch(&filter, self.config.voucher_batch_size)
            .await?;

        let mut cancelled = 0;
        for appointment in batch {
            let id = appointment.id;
            match self.cancel_if_voucher_expired(appointment).await {
                Ok(true) => cancelled += 1,
                Ok(false) => {}
                Err(e) => {
                    error!("Voucher-expiry processing failed for appointment {}: {}", id, e);
                }
            }
        }

        Ok(cancelled)
    }

    async fn cancel_if_voucher_expired(
        &self,
        mut appointment: Appointment,
    ) -> Result<bool, AppointmentError> {
        let now = Utc::now();
        let voucher_id = match appointment.voucher_id {
            Some(id) => id,
            None => return Ok(false),
        };

        let voucher = match self.vouchers.find_by_id(voucher_id).await? {
            Some(voucher) => voucher,
            None => {
                debug!(
                    "Voucher {} referenced by appointment {} no longer exists, skipping",
                    voucher_id, appointment.id
                );
                return Ok(false);
            }
        };
        if !voucher.is_expired(now) {
            return Ok(false);
        }

        // Release the hold before persisting the cancellation. Once the row
        // is Cancelled it leaves this job's filter for good, so a release
        // failure must keep the row retryable on the next tick.
        match self
            .customer_vouchers
            .find_active(appointment.customer_id, voucher_id)
            .await?
        {
            Some(customer_voucher) => {
                if let Err(e) = self.customer_vouchers.mark_unused(customer_voucher.id).await {
                    error!(
                        "Failed to release voucher {} for appointment {}: {}",
                        voucher_id, appointment.id, e
                    );
                    return Err(e);
                }
            }
            None => {
                warn!(
                    "No used voucher record found for customer {} and voucher {}",
                    appointment.customer_id, voucher_id
                );
            }
        }

        appointment.cancel(VOUCHER_EXPIRED_REASON, now);
        self.store.save(&appointment).await?;
        info!(
            "Cancelled appointment {} because voucher {} expired",
            appointment.id, voucher_id
        );

        self.notify_customer(
            NotificationKind::VoucherExpired,
            &appointment,
            "Appointment cancelled",
            "Your voucher expired, so the appointment was cancelled. The voucher hold has been released.",
            serde_json::json!({ "voucher_code": voucher.code }),
        )
        .await;

        Ok(true)
    }

    // ==========================================================================
    // JOB 4: DEPOSIT-TIMEOUT CANCELLATION
    // ==========================================================================

    #[instrument(skip(self))]
    async fn deposit_timeout_pass(&self) -> Result<usize, AppointmentError> {
        let now = Utc::now();
        let timeout = Duration::minutes(self.config.deposit_timeout_minutes);
        let filter = AppointmentFilter {
            statuses: vec![AppointmentStatus::Confirmed],
            zero_deposit: true,
            created_before: Some(now - timeout),
            ..AppointmentFilter::default()
        };
        let batch = self
            .store
            .find_batch(&filter, self.config.deposit_batch_size)
            .await?;

        let mut cancelled = 0;
        for mut appointment in batch {
            if !self.lifecycle.should_cancel_unpaid_deposit(
                appointment.status,
                appointment.deposit_amount,
                appointment.created_at,
                now,
                timeout,
            ) {
                continue;
            }

            appointment.cancel(DEPOSIT_TIMEOUT_REASON, now);
            match self.store.save(&appointment).await {
                Ok(()) => {
                    cancelled += 1;
                    info!(
                        "Cancelled appointment {} after deposit timeout",
                        appointment.id
                    );
                    self.notify_customer(
                        NotificationKind::DepositTimeout,
                        &appointment,
                        "Appointment cancelled",
                        "The deposit was not paid in time, so the appointment was cancelled.",
                        serde_json::json!({ "created_at": appointment.created_at }),
                    )
                    .await;
                }
                Err(e) => {
                    error!(
                        "Failed to cancel appointment {} after deposit timeout: {}",
                        appointment.id, e
                    );
                }
            }
        }

        Ok(cancelled)
    }

    // ==========================================================================
    // JOB 5: UPCOMING-APPOINTMENT REMINDER (read + notify only)
    // ==========================================================================

    #[instrument(skip(self))]
    async fn reminder_pass(&self) -> Result<usize, AppointmentError> {
        let now = Utc::now();
        let lookahead = Duration::hours(self.config.reminder_lookahead_hours);
        let filter = AppointmentFilter {
            statuses: vec![AppointmentStatus::Deposited, AppointmentStatus::Approved],
            starts_within: Some((now, now + lookahead)),
            ..AppointmentFilter::default()
        };
        let batch = self.store.find_batch(&filter, REMINDER_BATCH_SIZE).await?;

        let reminded = batch.len();
        for appointment in batch {
            self.notify_customer(
                NotificationKind::UpcomingReminder,
                &appointment,
                "Upcoming appointment",
                "You have an appointment coming up within the next day.",
                serde_json::json!({ "start_time": appointment.start_time }),
            )
            .await;
        }

        if reminded > 0 {
            debug!("Sent {} upcoming-appointment reminders", reminded);
        }
        Ok(reminded)
    }

    // ==========================================================================
    // SHARED NOTIFICATION HELPER (best-effort, never rolls back)
    // ==========================================================================

    async fn notify_customer(
        &self,
        kind: NotificationKind,
        appointment: &Appointment,
        title: &str,
        content: &str,
        context: serde_json::Value,
    ) {
        if let Err(e) = self.notifier.email(kind, appointment, context).await {
            warn!(
                "Failed to send {} email for appointment {}: {}",
                kind, appointment.id, e
            );
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
