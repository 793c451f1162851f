//! Alert gating, rendering and delivery.

mod channel;
mod debounce;
mod email;
mod sms;

pub use channel::{ChannelError, DispatchOutcome, Dispatcher, NotificationChannel};
pub use debounce::{AlertGate, GateStatus, HoldReason, StateChange};
pub use email::EmailChannel;
pub use sms::SmsChannel;

use crate::config::AlertConfig;
use crate::tracing::prelude::*;

/// Rendered notification content, shared by every channel.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertMessage {
    pub machine_id: String,
    pub subject: String,
    pub body: String,
    /// One-line rendering for SMS-sized transports.
    pub short_text: String,
}

impl AlertMessage {
    /// Render a state change for delivery.
    pub fn from_change(change: &StateChange, subject_base: &str) -> Self {
        let subject = format!(
            "{subject_base} - {} {}",
            change.machine_id, change.current
        );
        let body = format!(
            "Machine {} changed state: {} -> {}.\n\
             The previous state held for {}.\n\
             Observed at {}.",
            change.machine_id,
            change.previous,
            change.current,
            format_duration(change.previous_lasted),
            change.at,
        );
        let short_text = format!(
            "{}: {} -> {} after {}",
            change.machine_id,
            change.previous,
            change.current,
            format_duration(change.previous_lasted),
        );
        Self {
            machine_id: change.machine_id.clone(),
            subject,
            body,
            short_text,
        }
    }
}

/// Assemble delivery channels from config. A channel whose credentials
/// are missing is skipped with a warning so the monitor still runs.
pub fn build_dispatcher(config: &AlertConfig) -> Dispatcher {
    let mut channels: Vec<Box<dyn NotificationChannel>> = Vec::new();

    if let Some(email) = &config.email {
        match EmailChannel::from_env(email.clone()) {
            Ok(channel) => channels.push(Box::new(channel)),
            Err(error) => warn!(%error, "Email channel disabled"),
        }
    }
    if let Some(sms) = &config.sms {
        match SmsChannel::from_env(sms.clone()) {
            Ok(channel) => channels.push(Box::new(channel)),
            Err(error) => warn!(%error, "SMS channel disabled"),
        }
    }

    if channels.is_empty() {
        info!("No notification channels configured, changes will only be logged");
    }
    Dispatcher::new(channels)
}

fn format_duration(duration: time::Duration) -> String {
    let total_minutes = duration.whole_minutes().max(0);
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;
    if hours > 0 {
        format!("{hours}h {minutes:02}m")
    } else {
        format!("{minutes}m")
    }
}

/// Split a comma-separated recipient list, dropping blanks.
fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

/// Recipient override from an environment variable, when set and
/// non-empty.
fn env_list(name: &str) -> Option<Vec<String>> {
    let raw = std::env::var(name).ok()?;
    let list = parse_list(&raw);
    (!list.is_empty()).then_some(list)
}
