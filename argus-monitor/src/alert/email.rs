//! Email delivery through an HTTP mail relay.

use async_trait::async_trait;

use crate::config::EmailConfig;

use super::{AlertMessage, ChannelError, NotificationChannel};

/// Sends mail through a Mailgun-style relay endpoint.
pub struct EmailChannel {
    client: reqwest::Client,
    config: EmailConfig,
    token: String,
    recipients: Vec<String>,
}

impl EmailChannel {
    pub fn new(
        config: EmailConfig,
        token: String,
        recipients: Vec<String>,
    ) -> Result<Self, ChannelError> {
        if recipients.is_empty() {
            return Err(ChannelError::NoRecipients);
        }
        Ok(Self {
            client: reqwest::Client::new(),
            config,
            token,
            recipients,
        })
    }

    /// Build from config plus the environment: the API token comes from
    /// `ARGUS_EMAIL_TOKEN`, and `ARGUS_ALERT_EMAILS` overrides the
    /// configured recipient list when set.
    pub fn from_env(config: EmailConfig) -> Result<Self, ChannelError> {
        let token = std::env::var("ARGUS_EMAIL_TOKEN")
            .map_err(|_| ChannelError::MissingCredentials("ARGUS_EMAIL_TOKEN"))?;
        let recipients =
            super::env_list("ARGUS_ALERT_EMAILS").unwrap_or_else(|| config.recipients.clone());
        Self::new(config, token, recipients)
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn deliver(&self, message: &AlertMessage) -> Result<(), ChannelError> {
        let to = self.recipients.join(",");
        let response = self
            .client
            .post(&self.config.api_url)
            .basic_auth("api", Some(&self.token))
            .form(&[
                ("from", self.config.from.as_str()),
                ("to", to.as_str()),
                ("subject", message.subject.as_str()),
                ("text", message.body.as_str()),
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
