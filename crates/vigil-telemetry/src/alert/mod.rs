//! Error alerting: the suppression rule evaluator and webhook delivery.

mod notifier;
mod rules;

pub use notifier::AlertNotifier;
pub use rules::{decide, HTTP_ERROR};
