use std::env;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_service_token: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_service_token: env::var("SUPABASE_SERVICE_TOKEN")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_SERVICE_TOKEN not set, using empty value");
                    String::new()
                }),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_service_token.is_empty()
    }
}

/// Tick intervals, batch caps and time windows for the reconciliation jobs.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub assign_tick_seconds: u64,
    pub overdue_tick_seconds: u64,
    pub voucher_tick_seconds: u64,
    pub deposit_tick_seconds: u64,
    pub reminder_tick_seconds: u64,
    pub assign_batch_size: usize,
    pub overdue_batch_size: usize,
    pub voucher_batch_size: usize,
    pub deposit_batch_size: usize,
    pub overdue_grace_minutes: i64,
    pub deposit_timeout_minutes: i64,
    pub reminder_lookahead_hours: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            assign_tick_seconds: 60,
            overdue_tick_seconds: 60,
            voucher_tick_seconds: 60,
            deposit_tick_seconds: 60,
            reminder_tick_seconds: 30 * 60,
            assign_batch_size: 10,
            overdue_batch_size: 50,
            voucher_batch_size: 50,
            deposit_batch_size: 50,
            overdue_grace_minutes: 120,
            deposit_timeout_minutes: 5,
            reminder_lookahead_hours: 24,
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            assign_tick_seconds: env_u64("ASSIGN_TICK_SECONDS", defaults.assign_tick_seconds),
            overdue_tick_seconds: env_u64("OVERDUE_TICK_SECONDS", defaults.overdue_tick_seconds),
            voucher_tick_seconds: env_u64("VOUCHER_TICK_SECONDS", defaults.voucher_tick_seconds),
            deposit_tick_seconds: env_u64("DEPOSIT_TICK_SECONDS", defaults.deposit_tick_seconds),
            reminder_tick_seconds: env_u64("REMINDER_TICK_SECONDS", defaults.reminder_tick_seconds),
            assign_batch_size: env_usize("ASSIGN_BATCH_SIZE", defaults.assign_batch_size),
            overdue_batch_size: env_usize("OVERDUE_BATCH_SIZE", defaults.overdue_batch_size),
            voucher_batch_size: env_usize("VOUCHER_BATCH_SIZE", defaults.voucher_batch_size),
            deposit_batch_size: env_usize("DEPOSIT_BATCH_SIZE", defaults.deposit_batch_size),
            overdue_grace_minutes: env_i64("OVERDUE_GRACE_MINUTES", defaults.overdue_grace_minutes),
            deposit_timeout_minutes: env_i64("DEPOSIT_TIMEOUT_MINUTES", defaults.deposit_timeout_minutes),
            reminder_lookahead_hours: env_i64("REMINDER_LOOKAHEAD_HOURS", defaults.reminder_lookahead_hours),
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    match env::var(key) {
        Ok(value) => value.parse().unwrap_or_else(|_| {
            warn!("{} is not a valid integer, using default {}", key, default);
            default
        }),
        Err(_) => default,
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    match env::var(key) {
        Ok(value) => value.parse().unwrap_or_else(|_| {
            warn!("{} is not a valid integer, using default {}", key, default);
            default
        }),
        Err(_) => default,
    }
}

fn env_i64(key: &str, default: i64) -> i64 {
    match env::var(key) {
        Ok(value) => value.parse().unwrap_or_else(|_| {
            warn!("{} is not a valid integer, using default {}", key, default);
            default
        }),
        Err(_) => default,
    }
}
