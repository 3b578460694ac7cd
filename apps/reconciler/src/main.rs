use std::sync::Arc;
use dotenv::dotenv;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use appointment_cell::notify::{LoggingNotifier, SupabaseNotificationSink};
use appointment_cell::services::ReconciliationScheduler;
use appointment_cell::stores::supabase::{
    SupabaseAppointmentStore, SupabaseCapabilityProvider, SupabaseVoucherStore,
};
use shared_config::{AppConfig, SchedulerConfig};
use shared_database::SupabaseClient;

#[tokio::main]
async fn main() {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting spa appointment reconciler");

    // Load configuration
    let config = AppConfig::from_env();
    let scheduler_config = SchedulerConfig::from_env();

    let supabase = Arc::new(SupabaseClient::new(&config));
    let token = config.supabase_service_token.clone();

    let store = Arc::new(SupabaseAppointmentStore::new(
        Arc::clone(&supabase),
        token.clone(),
    ));
    let capabilities = Arc::new(SupabaseCapabilityProvider::new(
        Arc::clone(&supabase),
        token.clone(),
    ));
    let vouchers = Arc::new(SupabaseVoucherStore::new(
        Arc::clone(&supabase),
        token.clone(),
    ));
    let notifications = Arc::new(SupabaseNotificationSink::new(
        Arc::clone(&supabase),
        token,
    ));

    let scheduler = Arc::new(ReconciliationScheduler::new(
        store,
        capabilities,
        Arc::clone(&vouchers) as Arc<dyn appointment_cell::stores::VoucherStore>,
        vouchers,
        Arc::new(LoggingNotifier),
        notifications,
        scheduler_config,
    ));

    let handles = scheduler.start();
    info!("Reconciliation jobs running ({} loops)", handles.len());

    tokio::signal::ctrl_c().await.ok();
    info!("Shutdown signal received, stopping reconciler");

    for handle in handles {
        handle.abort();
    }
}
