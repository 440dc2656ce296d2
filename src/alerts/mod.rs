/// Active alert table keyed by correlated alert id
pub mod active_table;
/// Notification channels and dispatch
pub mod notifier;
pub mod rate_limiter;

pub use active_table::{ActiveAlertEntry, ActiveAlertTable};
pub use notifier::{LogNotifier, Notification, NotificationDispatcher, Notifier, WebhookNotifier};
pub use rate_limiter::RateLimiter;
