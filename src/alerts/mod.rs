pub mod matcher;
pub mod notify;
pub mod term;

pub use matcher::{compile_rules, evaluate};
pub use notify::{compose_notifications, LogNotifier, Notifier, WebhookNotifier};
