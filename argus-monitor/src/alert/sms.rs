//! SMS delivery through a Twilio-style API.

use async_trait::async_trait;

use crate::config::SmsConfig;
use crate::tracing::prelude::*;

use super::{AlertMessage, ChannelError, NotificationChannel};

/// Sends one SMS per recipient. Delivery counts as successful when at
/// least one recipient accepted the message.
pub struct SmsChannel {
    client: reqwest::Client,
    config: SmsConfig,
    sid: String,
    token: String,
    recipients: Vec<String>,
}

impl SmsChannel {
    pub fn new(
        config: SmsConfig,
        sid: String,
        token: String,
        recipients: Vec<String>,
    ) -> Result<Self, ChannelError> {
        if recipients.is_empty() {
            return Err(ChannelError::NoRecipients);
        }
        Ok(Self {
            client: reqwest::Client::new(),
            config,
            sid,
            token,
            recipients,
        })
    }

    /// Build from config plus the environment: credentials come from
    /// `ARGUS_TWILIO_SID` and `ARGUS_TWILIO_TOKEN`, and
    /// `ARGUS_ALERT_PHONES` overrides the configured recipient list
    /// when set.
    pub fn from_env(config: SmsConfig) -> Result<Self, ChannelError> {
        let sid = std::env::var("ARGUS_TWILIO_SID")
            .map_err(|_| ChannelError::MissingCredentials("ARGUS_TWILIO_SID"))?;
        let token = std::env::var("ARGUS_TWILIO_TOKEN")
            .map_err(|_| ChannelError::MissingCredentials("ARGUS_TWILIO_TOKEN"))?;
        let recipients =
            super::env_list("ARGUS_ALERT_PHONES").unwrap_or_else(|| config.recipients.clone());
        Self::new(config, sid, token, recipients)
    }

    async fn send_one(&self, recipient: &str, message: &AlertMessage) -> Result<(), ChannelError> {
        let response = self
            .client
            .post(&self.config.api_url)
            .basic_auth(&self.sid, Some(&self.token))
            .form(&[
                ("To", recipient),
                ("From", self.config.from_number.as_str()),
                ("Body", message.short_text.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ChannelError::Rejected {
                status: response.status(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationChannel for SmsChannel {
    fn name(&self) -> &'static str {
        "sms"
    }

    async fn deliver(&self, message: &AlertMessage) -> Result<(), ChannelError> {
        let mut delivered = 0usize;
        for recipient in &self.recipients {
            match self.send_one(recipient, message).await {
                Ok(()) => delivered += 1,
                Err(error) => {
                    warn!(recipient = %mask(recipient), %error, "SMS delivery failed");
                }
            }
        }

        if delivered == 0 {
            return Err(ChannelError::AllRecipientsFailed);
        }
        Ok(())
    }
}

/// Keep phone numbers out of the logs, last four digits excepted.
fn mask(number: &str) -> String {
    match number.char_indices().nth_back(3) {
        Some((idx, _)) => format!("...{}", &number[idx..]),
        None => number.to_string(),
    }
}
