// libs/appointment-cell/tests/reconciliation_test.rs
//
// One-tick behavior of the reconciliation jobs against in-memory stores.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use appointment_cell::models::{
    Appointment, AppointmentDetail, AppointmentError, AppointmentStatus, CustomerVoucher, Doctor,
    Service, Voucher,
};
use appointment_cell::notify::{
    NewNotification, NotificationKind, NotificationSink, Notifier,
};
use appointment_cell::services::availability::{intervals_overlap, AvailabilityChecker};
use appointment_cell::services::reconciliation::{
    JobGuard, ReconciliationJob, ReconciliationScheduler, DEPOSIT_TIMEOUT_REASON,
    VOUCHER_EXPIRED_REASON,
};
use appointment_cell::stores::{
    AppointmentFilter, AppointmentStore, CapabilityProvider, CustomerVoucherStore, VoucherStore,
};
use shared_config::SchedulerConfig;

// ==============================================================================
// IN-MEMORY FAKES
// ==============================================================================

#[derive(Default)]
struct InMemoryAppointmentStore {
    rows: Mutex<Vec<Appointment>>,
    fetches: AtomicUsize,
    saves: AtomicUsize,
    fail_save_for: Mutex<Vec<Uuid>>,
}

impl InMemoryAppointmentStore {
    fn with_rows(rows: Vec<Appointment>) -> Self {
        Self {
            rows: Mutex::new(rows),
            ..Self::default()
        }
    }

    fn get(&self, id: Uuid) -> Option<Appointment> {
        self.rows.lock().unwrap().iter().find(|a| a.id == id).cloned()
    }

    fn fail_save_for(&self, id: Uuid) {
        self.fail_save_for.lock().unwrap().push(id);
    }

    fn matches(filter: &AppointmentFilter, row: &Appointment) -> bool {
        if row.deleted_at.is_some() {
            return false;
        }
        if !filter.statuses.is_empty() && !filter.statuses.contains(&row.status) {
            return false;
        }
        if filter.doctor_unassigned && row.doctor_id.is_some() {
            return false;
        }
        if filter.has_voucher && row.voucher_id.is_none() {
            return false;
        }
        if filter.zero_deposit && row.deposit_amount > 0.0 {
            return false;
        }
        if let Some(before) = filter.starts_before {
            if row.start_time >= before {
                return false;
            }
        }
        if let Some((from, to)) = filter.starts_within {
            if row.start_time < from || row.start_time > to {
                return false;
            }
        }
        if let Some(before) = filter.created_before {
            if row.created_at >= before {
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn find_batch(
        &self,
        filter: &AppointmentFilter,
        limit: usize,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let mut matching: Vec<Appointment> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|row| Self::matches(filter, row))
            .cloned()
            .collect();
        matching.sort_by_key(|row| row.created_at);
        matching.truncate(limit);
        Ok(matching)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Appointment, AppointmentError> {
        self.get(id).ok_or(AppointmentError::NotFound)
    }

    async fn find_for_doctor_in_range(
        &self,
        doctor_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|row| row.doctor_id == Some(doctor_id))
            .filter(|row| row.start_time < end && row.end_time > start)
            .cloned()
            .collect())
    }

    async fn save(&self, appointment: &Appointment) -> Result<(), AppointmentError> {
        if self.fail_save_for.lock().unwrap().contains(&appointment.id) {
            return Err(AppointmentError::DatabaseError("simulated outage".into()));
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.rows.lock().unwrap();
        match rows.iter_mut().find(|row| row.id == appointment.id) {
            Some(row) => {
                *row = appointment.clone();
                Ok(())
            }
            None => Err(AppointmentError::NotFound),
        }
    }
}

#[derive(Default)]
struct InMemoryCapabilities {
    services: HashMap<Uuid, Service>,
}

impl InMemoryCapabilities {
    fn add(&mut self, service: Service) {
        self.services.insert(service.id, service);
    }
}

#[async_trait]
impl CapabilityProvider for InMemoryCapabilities {
    async fn services_for(
        &self,
        appointment: &Appointment,
    ) -> Result<Vec<Service>, AppointmentError> {
        Ok(appointment
            .service_ids()
            .iter()
            .filter_map(|id| self.services.get(id).cloned())
            .collect())
    }
}

#[derive(Default)]
struct InMemoryVouchers {
    vouchers: HashMap<Uuid, Voucher>,
    customer_vouchers: Mutex<Vec<CustomerVoucher>>,
    fail_release: AtomicBool,
}

#[async_trait]
impl VoucherStore for InMemoryVouchers {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Voucher>, AppointmentError> {
        Ok(self.vouchers.get(&id).cloned())
    }
}

#[async_trait]
impl CustomerVoucherStore for InMemoryVouchers {
    async fn find_active(
        &self,
        customer_id: Uuid,
        voucher_id: Uuid,
    ) -> Result<Option<CustomerVoucher>, AppointmentError> {
        Ok(self
            .customer_vouchers
            .lock()
            .unwrap()
            .iter()
            .find(|cv| cv.customer_id == customer_id && cv.voucher_id == voucher_id && cv.is_used)
            .cloned())
    }

    async fn mark_unused(&self, id: Uuid) -> Result<(), AppointmentError> {
        if self.fail_release.load(Ordering::SeqCst) {
            return Err(AppointmentError::DatabaseError("simulated outage".into()));
        }
        let mut records = self.customer_vouchers.lock().unwrap();
        if let Some(record) = records.iter_mut().find(|cv| cv.id == id) {
            record.is_used = false;
            record.used_at = None;
        }
        Ok(())
    }
}

#[derive(Default)]
struct RecordingNotifier {
    emails: Mutex<Vec<NotificationKind>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn email(
        &self,
        kind: NotificationKind,
        _appointment: &Appointment,
        _context: serde_json::Value,
    ) -> Result<(), AppointmentError> {
        self.emails.lock().unwrap().push(kind);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingSink {
    notifications: Mutex<Vec<NewNotification>>,
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn create(&self, notification: NewNotification) -> Result<(), AppointmentError> {
        self.notifications.lock().unwrap().push(notification);
        Ok(())
    }
}

struct DenyingGuard;

impl JobGuard for DenyingGuard {
    fn try_acquire(&self, _job: ReconciliationJob) -> bool {
        false
    }

    fn release(&self, _job: ReconciliationJob) {}
}

// ==============================================================================
// FIXTURES
// ==============================================================================

fn appointment(status: AppointmentStatus) -> Appointment {
    let now = Utc::now();
    Appointment {
        id: Uuid::new_v4(),
        customer_id: Uuid::new_v4(),
        doctor_id: None,
        staff_id: None,
        start_time: now + Duration::hours(24),
        end_time: now + Duration::hours(25),
        appointment_date: (now + Duration::hours(24)).date_naive(),
        total_amount: 100.0,
        deposit_amount: 0.0,
        order_code: None,
        voucher_id: None,
        payment_method: None,
        status,
        cancelled_at: None,
        cancel_reason: None,
        rejection_reason: None,
        created_at: now,
        updated_at: now,
        deleted_at: None,
        details: vec![],
    }
}

fn with_service_line(mut appointment: Appointment, service_id: Uuid) -> Appointment {
    appointment.details.push(AppointmentDetail {
        appointment_id: appointment.id,
        service_id,
        price: 100.0,
        quantity: 1,
    });
    appointment
}

fn doctor(name: &str) -> Doctor {
    Doctor {
        id: Uuid::new_v4(),
        first_name: name.to_string(),
        last_name: "Nguyen".to_string(),
        specialization: "Dermatology".to_string(),
    }
}

struct TestSetup {
    store: Arc<InMemoryAppointmentStore>,
    capabilities: Arc<InMemoryCapabilities>,
    vouchers: Arc<InMemoryVouchers>,
    notifier: Arc<RecordingNotifier>,
    sink: Arc<RecordingSink>,
}

impl TestSetup {
    fn new(
        rows: Vec<Appointment>,
        capabilities: InMemoryCapabilities,
        vouchers: InMemoryVouchers,
    ) -> Self {
        Self {
            store: Arc::new(InMemoryAppointmentStore::with_rows(rows)),
            capabilities: Arc::new(capabilities),
            vouchers: Arc::new(vouchers),
            notifier: Arc::new(RecordingNotifier::default()),
            sink: Arc::new(RecordingSink::default()),
        }
    }

    fn scheduler(&self) -> ReconciliationScheduler {
        ReconciliationScheduler::new(
            Arc::clone(&self.store) as Arc<dyn AppointmentStore>,
            Arc::clone(&self.capabilities) as Arc<dyn CapabilityProvider>,
            Arc::clone(&self.vouchers) as Arc<dyn VoucherStore>,
            Arc::clone(&self.vouchers) as Arc<dyn CustomerVoucherStore>,
            Arc::clone(&self.notifier) as Arc<dyn Notifier>,
            Arc::clone(&self.sink) as Arc<dyn NotificationSink>,
            SchedulerConfig::default(),
        )
    }

    fn emails(&self) -> Vec<NotificationKind> {
        self.notifier.emails.lock().unwrap().clone()
    }
}

// ==============================================================================
// DOCTOR ASSIGNMENT
// ==============================================================================

#[tokio::test]
async fn assignment_assigns_qualified_available_doctor() {
    let service_id = Uuid::new_v4();
    let doc = doctor("An");
    let mut capabilities = InMemoryCapabilities::default();
    capabilities.add(Service {
        id: service_id,
        name: "Facial".to_string(),
        doctors: vec![doc.clone()],
    });

    let row = with_service_line(appointment(AppointmentStatus::Deposited), service_id);
    let id = row.id;
    let setup = TestSetup::new(vec![row], capabilities, InMemoryVouchers::default());

    let assigned = setup
        .scheduler()
        .run_tick(ReconciliationJob::AssignDoctors)
        .await
        .unwrap();

    assert_eq!(assigned, 1);
    let updated = setup.store.get(id).unwrap();
    assert_eq!(updated.doctor_id, Some(doc.id));
    assert_eq!(updated.status, AppointmentStatus::Deposited);
    assert_eq!(setup.emails(), vec![NotificationKind::DoctorAssigned]);
}

#[tokio::test]
async fn assignment_leaves_row_unchanged_when_no_qualified_doctor() {
    let service_id = Uuid::new_v4();
    let row = with_service_line(appointment(AppointmentStatus::Deposited), service_id);
    let id = row.id;
    // Capability map knows nothing about the requested service.
    let setup = TestSetup::new(
        vec![row],
        InMemoryCapabilities::default(),
        InMemoryVouchers::default(),
    );

    let assigned = setup
        .scheduler()
        .run_tick(ReconciliationJob::AssignDoctors)
        .await
        .unwrap();

    assert_eq!(assigned, 0);
    assert_eq!(setup.store.get(id).unwrap().doctor_id, None);
    assert_eq!(setup.store.saves.load(Ordering::SeqCst), 0);
    assert!(setup.emails().is_empty());
}

#[tokio::test]
async fn assignment_picks_the_only_free_candidate() {
    // Two service lines requiring {A,B} and {B,C}; A and C are fully booked
    // over the slot, so B must be chosen deterministically.
    let (s1, s2) = (Uuid::new_v4(), Uuid::new_v4());
    let (a, b, c) = (doctor("A"), doctor("B"), doctor("C"));
    let mut capabilities = InMemoryCapabilities::default();
    capabilities.add(Service {
        id: s1,
        name: "Massage".to_string(),
        doctors: vec![a.clone(), b.clone()],
    });
    capabilities.add(Service {
        id: s2,
        name: "Sauna".to_string(),
        doctors: vec![b.clone(), c.clone()],
    });

    let target = with_service_line(
        with_service_line(appointment(AppointmentStatus::Deposited), s1),
        s2,
    );
    let target_id = target.id;

    let mut busy_a = appointment(AppointmentStatus::Approved);
    busy_a.doctor_id = Some(a.id);
    busy_a.start_time = target.start_time;
    busy_a.end_time = target.end_time;
    let mut busy_c = appointment(AppointmentStatus::Deposited);
    busy_c.doctor_id = Some(c.id);
    busy_c.start_time = target.start_time - Duration::minutes(30);
    busy_c.end_time = target.start_time + Duration::minutes(30);

    let setup = TestSetup::new(
        vec![target, busy_a, busy_c],
        capabilities,
        InMemoryVouchers::default(),
    );

    let assigned = setup
        .scheduler()
        .run_tick(ReconciliationJob::AssignDoctors)
        .await
        .unwrap();

    assert_eq!(assigned, 1);
    assert_eq!(setup.store.get(target_id).unwrap().doctor_id, Some(b.id));
}

#[tokio::test]
async fn assignment_ignores_cancelled_bookings_when_checking_availability() {
    let service_id = Uuid::new_v4();
    let doc = doctor("An");
    let mut capabilities = InMemoryCapabilities::default();
    capabilities.add(Service {
        id: service_id,
        name: "Facial".to_string(),
        doctors: vec![doc.clone()],
    });

    let target = with_service_line(appointment(AppointmentStatus::Deposited), service_id);
    let target_id = target.id;

    // Overlapping but cancelled: does not block the doctor.
    let mut cancelled = appointment(AppointmentStatus::Cancelled);
    cancelled.doctor_id = Some(doc.id);
    cancelled.start_time = target.start_time;
    cancelled.end_time = target.end_time;

    let setup = TestSetup::new(
        vec![target, cancelled],
        capabilities,
        InMemoryVouchers::default(),
    );

    setup
        .scheduler()
        .run_tick(ReconciliationJob::AssignDoctors)
        .await
        .unwrap();

    assert_eq!(setup.store.get(target_id).unwrap().doctor_id, Some(doc.id));
}

#[tokio::test]
async fn assignment_failure_on_one_row_does_not_block_the_batch() {
    let service_id = Uuid::new_v4();
    let doc = doctor("An");
    let mut capabilities = InMemoryCapabilities::default();
    capabilities.add(Service {
        id: service_id,
        name: "Facial".to_string(),
        doctors: vec![doc.clone()],
    });

    let mut first = with_service_line(appointment(AppointmentStatus::Deposited), service_id);
    first.created_at = Utc::now() - Duration::minutes(10);
    // Second row must not overlap the first, or the doctor is busy by then.
    let mut second = with_service_line(appointment(AppointmentStatus::Deposited), service_id);
    second.start_time = first.end_time + Duration::hours(1);
    second.end_time = second.start_time + Duration::hours(1);
    let (first_id, second_id) = (first.id, second.id);

    let setup = TestSetup::new(
        vec![first, second],
        capabilities,
        InMemoryVouchers::default(),
    );
    setup.store.fail_save_for(first_id);

    let assigned = setup
        .scheduler()
        .run_tick(ReconciliationJob::AssignDoctors)
        .await
        .unwrap();

    assert_eq!(assigned, 1);
    assert_eq!(setup.store.get(first_id).unwrap().doctor_id, None);
    assert_eq!(setup.store.get(second_id).unwrap().doctor_id, Some(doc.id));
}

// ==============================================================================
// OVERDUE DETECTION
// ==============================================================================

#[tokio::test]
async fn overdue_tick_flips_appointments_past_the_grace_window() {
    let now = Utc::now();
    let mut stale = appointment(AppointmentStatus::Pending);
    stale.start_time = now - Duration::hours(3);
    stale.end_time = now - Duration::hours(2);
    let mut recent = appointment(AppointmentStatus::Deposited);
    recent.start_time = now - Duration::hours(1);
    recent.end_time = now;
    let (stale_id, recent_id) = (stale.id, recent.id);

    let setup = TestSetup::new(
        vec![stale, recent],
        InMemoryCapabilities::default(),
        InMemoryVouchers::default(),
    );

    let flipped = setup
        .scheduler()
        .run_tick(ReconciliationJob::OverdueSweep)
        .await
        .unwrap();

    assert_eq!(flipped, 1);
    assert_eq!(
        setup.store.get(stale_id).unwrap().status,
        AppointmentStatus::Overdue
    );
    assert_eq!(
        setup.store.get(recent_id).unwrap().status,
        AppointmentStatus::Deposited
    );
    assert_eq!(setup.emails(), vec![NotificationKind::AppointmentOverdue]);
}

#[tokio::test]
async fn overdue_tick_ignores_completed_and_terminal_rows() {
    let now = Utc::now();
    let mut done = appointment(AppointmentStatus::Completed);
    done.start_time = now - Duration::hours(5);
    done.end_time = now - Duration::hours(4);
    let mut paid = appointment(AppointmentStatus::Paid);
    paid.start_time = now - Duration::hours(5);
    paid.end_time = now - Duration::hours(4);

    let setup = TestSetup::new(
        vec![done, paid],
        InMemoryCapabilities::default(),
        InMemoryVouchers::default(),
    );

    let flipped = setup
        .scheduler()
        .run_tick(ReconciliationJob::OverdueSweep)
        .await
        .unwrap();

    assert_eq!(flipped, 0);
    assert_eq!(setup.store.saves.load(Ordering::SeqCst), 0);
}

// ==============================================================================
// VOUCHER-EXPIRY CANCELLATION
// ==============================================================================

#[tokio::test]
async fn voucher_expiry_cancels_appointment_and_releases_voucher() {
    let now = Utc::now();
    let voucher_id = Uuid::new_v4();
    let mut row = appointment(AppointmentStatus::Pending);
    row.voucher_id = Some(voucher_id);
    let (row_id, customer_id) = (row.id, row.customer_id);

    let mut vouchers = InMemoryVouchers::default();
    vouchers.vouchers.insert(
        voucher_id,
        Voucher {
            id: voucher_id,
            code: "SPRING".to_string(),
            valid_to: now - Duration::days(1),
        },
    );
    let hold_id = Uuid::new_v4();
    vouchers.customer_vouchers.lock().unwrap().push(CustomerVoucher {
        id: hold_id,
        customer_id,
        voucher_id,
        is_used: true,
        used_at: Some(now - Duration::days(2)),
    });

    let setup = TestSetup::new(vec![row], InMemoryCapabilities::default(), vouchers);

    let cancelled = setup
        .scheduler()
        .run_tick(ReconciliationJob::VoucherExpiry)
        .await
        .unwrap();

    assert_eq!(cancelled, 1);
    let updated = setup.store.get(row_id).unwrap();
    assert_eq!(updated.status, AppointmentStatus::Cancelled);
    assert_eq!(updated.cancel_reason.as_deref(), Some(VOUCHER_EXPIRED_REASON));
    assert!(updated.cancelled_at.is_some());

    let holds = setup.vouchers.customer_vouchers.lock().unwrap();
    let hold = holds.iter().find(|cv| cv.id == hold_id).unwrap();
    assert!(!hold.is_used);
    assert!(hold.used_at.is_none());
}

#[tokio::test]
async fn voucher_expiry_skips_unexpired_and_missing_vouchers() {
    let now = Utc::now();
    let live_voucher_id = Uuid::new_v4();
    let mut live = appointment(AppointmentStatus::Confirmed);
    live.voucher_id = Some(live_voucher_id);
    let mut orphan = appointment(AppointmentStatus::Pending);
    orphan.voucher_id = Some(Uuid::new_v4());
    let (live_id, orphan_id) = (live.id, orphan.id);

    let mut vouchers = InMemoryVouchers::default();
    vouchers.vouchers.insert(
        live_voucher_id,
        Voucher {
            id: live_voucher_id,
            code: "SUMMER".to_string(),
            valid_to: now + Duration::days(7),
        },
    );

    let setup = TestSetup::new(vec![live, orphan], InMemoryCapabilities::default(), vouchers);

    let cancelled = setup
        .scheduler()
        .run_tick(ReconciliationJob::VoucherExpiry)
        .await
        .unwrap();

    assert_eq!(cancelled, 0);
    assert_eq!(
        setup.store.get(live_id).unwrap().status,
        AppointmentStatus::Confirmed
    );
    assert_eq!(
        setup.store.get(orphan_id).unwrap().status,
        AppointmentStatus::Pending
    );
}

#[tokio::test]
async fn voucher_release_failure_leaves_the_row_retryable() {
    let now = Utc::now();
    let voucher_id = Uuid::new_v4();
    let mut row = appointment(AppointmentStatus::Pending);
    row.voucher_id = Some(voucher_id);
    let (row_id, customer_id) = (row.id, row.customer_id);

    let mut vouchers = InMemoryVouchers::default();
    vouchers.vouchers.insert(
        voucher_id,
        Voucher {
            id: voucher_id,
            code: "SPRING".to_string(),
            valid_to: now - Duration::days(1),
        },
    );
    let hold_id = Uuid::new_v4();
    vouchers.customer_vouchers.lock().unwrap().push(CustomerVoucher {
        id: hold_id,
        customer_id,
        voucher_id,
        is_used: true,
        used_at: Some(now - Duration::days(2)),
    });

    let setup = TestSetup::new(vec![row], InMemoryCapabilities::default(), vouchers);
    setup.vouchers.fail_release.store(true, Ordering::SeqCst);
    let scheduler = setup.scheduler();

    let cancelled = scheduler
        .run_tick(ReconciliationJob::VoucherExpiry)
        .await
        .unwrap();

    // The cancellation must not be persisted while the hold is still used:
    // a Cancelled row would leave the job's filter with the hold stuck.
    assert_eq!(cancelled, 0);
    assert_eq!(
        setup.store.get(row_id).unwrap().status,
        AppointmentStatus::Pending
    );
    assert!(setup.vouchers.customer_vouchers.lock().unwrap()[0].is_used);

    // Once the store recovers, the next tick finishes the whole step.
    setup.vouchers.fail_release.store(false, Ordering::SeqCst);
    let cancelled = scheduler
        .run_tick(ReconciliationJob::VoucherExpiry)
        .await
        .unwrap();

    assert_eq!(cancelled, 1);
    assert_eq!(
        setup.store.get(row_id).unwrap().status,
        AppointmentStatus::Cancelled
    );
    assert!(!setup.vouchers.customer_vouchers.lock().unwrap()[0].is_used);
}

// ==============================================================================
// DEPOSIT-TIMEOUT CANCELLATION
// ==============================================================================

#[tokio::test]
async fn deposit_timeout_cancels_only_rows_past_the_window() {
    let now = Utc::now();
    let mut expired = appointment(AppointmentStatus::Confirmed);
    expired.created_at = now - Duration::minutes(6);
    let mut fresh = appointment(AppointmentStatus::Confirmed);
    fresh.created_at = now - Duration::minutes(4);
    let (expired_id, fresh_id) = (expired.id, fresh.id);

    let setup = TestSetup::new(
        vec![expired, fresh],
        InMemoryCapabilities::default(),
        InMemoryVouchers::default(),
    );

    let cancelled = setup
        .scheduler()
        .run_tick(ReconciliationJob::DepositTimeout)
        .await
        .unwrap();

    assert_eq!(cancelled, 1);
    let updated = setup.store.get(expired_id).unwrap();
    assert_eq!(updated.status, AppointmentStatus::Cancelled);
    assert_eq!(updated.cancel_reason.as_deref(), Some(DEPOSIT_TIMEOUT_REASON));
    assert_eq!(
        setup.store.get(fresh_id).unwrap().status,
        AppointmentStatus::Confirmed
    );
    assert_eq!(setup.emails(), vec![NotificationKind::DepositTimeout]);
}

#[tokio::test]
async fn deposit_timeout_spares_rows_with_a_recorded_deposit() {
    let now = Utc::now();
    let mut paid_deposit = appointment(AppointmentStatus::Confirmed);
    paid_deposit.created_at = now - Duration::minutes(30);
    paid_deposit.deposit_amount = 50.0;
    let id = paid_deposit.id;

    let setup = TestSetup::new(
        vec![paid_deposit],
        InMemoryCapabilities::default(),
        InMemoryVouchers::default(),
    );

    let cancelled = setup
        .scheduler()
        .run_tick(ReconciliationJob::DepositTimeout)
        .await
        .unwrap();

    assert_eq!(cancelled, 0);
    assert_eq!(
        setup.store.get(id).unwrap().status,
        AppointmentStatus::Confirmed
    );
}

// ==============================================================================
// UPCOMING REMINDER
// ==============================================================================

#[tokio::test]
async fn reminder_tick_notifies_without_touching_state() {
    let now = Utc::now();
    let mut soon = appointment(AppointmentStatus::Deposited);
    soon.start_time = now + Duration::hours(2);
    soon.end_time = now + Duration::hours(3);
    let mut far = appointment(AppointmentStatus::Approved);
    far.start_time = now + Duration::hours(48);
    far.end_time = now + Duration::hours(49);

    let setup = TestSetup::new(
        vec![soon, far],
        InMemoryCapabilities::default(),
        InMemoryVouchers::default(),
    );

    let reminded = setup
        .scheduler()
        .run_tick(ReconciliationJob::UpcomingReminder)
        .await
        .unwrap();

    assert_eq!(reminded, 1);
    assert_eq!(setup.store.saves.load(Ordering::SeqCst), 0);
    assert_eq!(setup.emails(), vec![NotificationKind::UpcomingReminder]);
}

// ==============================================================================
// RE-ENTRANCY GUARD
// ==============================================================================

#[tokio::test]
async fn held_guard_skips_the_tick_entirely() {
    let mut stale = appointment(AppointmentStatus::Pending);
    stale.start_time = Utc::now() - Duration::hours(3);
    stale.end_time = Utc::now() - Duration::hours(2);

    let setup = TestSetup::new(
        vec![stale],
        InMemoryCapabilities::default(),
        InMemoryVouchers::default(),
    );
    let scheduler = setup.scheduler().with_guard(Arc::new(DenyingGuard));

    let flipped = scheduler
        .run_tick(ReconciliationJob::OverdueSweep)
        .await
        .unwrap();

    // Zero fetches, zero writes: the tick never started.
    assert_eq!(flipped, 0);
    assert_eq!(setup.store.fetches.load(Ordering::SeqCst), 0);
    assert_eq!(setup.store.saves.load(Ordering::SeqCst), 0);
}

// ==============================================================================
// AVAILABILITY
// ==============================================================================

#[test]
fn overlap_test_is_half_open() {
    let now = Utc::now();
    let hour = Duration::hours(1);

    // Back-to-back slots do not overlap.
    assert!(!intervals_overlap(now, now + hour, now + hour, now + hour * 2));
    // Any shared interior point does.
    assert!(intervals_overlap(
        now,
        now + hour,
        now + Duration::minutes(30),
        now + hour * 2
    ));
    // Containment counts as overlap.
    assert!(intervals_overlap(
        now,
        now + hour * 3,
        now + hour,
        now + hour * 2
    ));
}

#[tokio::test]
async fn availability_is_idempotent() {
    let doc = doctor("An");
    let now = Utc::now();
    let mut booked = appointment(AppointmentStatus::Approved);
    booked.doctor_id = Some(doc.id);
    booked.start_time = now + Duration::hours(1);
    booked.end_time = now + Duration::hours(2);

    let store = Arc::new(InMemoryAppointmentStore::with_rows(vec![booked]));
    let checker = AvailabilityChecker::new(Arc::clone(&store) as Arc<dyn AppointmentStore>);

    let first = checker
        .is_available(doc.id, now + Duration::hours(1), now + Duration::hours(2))
        .await
        .unwrap();
    let second = checker
        .is_available(doc.id, now + Duration::hours(1), now + Duration::hours(2))
        .await
        .unwrap();

    assert_eq!(first, second);
    assert!(!first);

    // A disjoint window is free.
    assert!(checker
        .is_available(doc.id, now + Duration::hours(3), now + Duration::hours(4))
        .await
        .unwrap());
}
