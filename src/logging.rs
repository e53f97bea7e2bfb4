use log::{error, info, warn};
use rust_decimal::Decimal;

pub fn log_rejection(reason: &str) {
    error!("❌ Rejected: {}", reason);
}

pub fn log_retry(attempt: u32, reason: &str) {
    warn!("🔁 Retry {} — {}", attempt, reason);
}

pub fn log_partial(filled: Decimal, remaining: Decimal) {
    warn!("⚠️ Partial fill — filled ${filled}, remaining ${remaining}");
}

pub fn log_success(msg: &str) {
    info!("✅ {}", msg);
}
