pub mod lifecycle;
pub mod availability;
pub mod assignment;
pub mod appointment;
pub mod reconciliation;

pub use lifecycle::AppointmentLifecycleService;
pub use availability::AvailabilityChecker;
pub use assignment::AssignmentResolver;
pub use appointment::AppointmentService;
pub use reconciliation::ReconciliationScheduler;
