use async_trait::async_trait;
use eyre::{Result, WrapErr};
use rusoto_core::Region;
use rusoto_ses::{Body, Content, Destination, Message, SendEmailRequest, Ses, SesClient};
use tracing::{info, warn};

/// Operational-notification seam. The transformer uses it when the upstream
/// device catalog is inconsistent; integrity failures anywhere else go
/// through it too.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one notification.
    async fn notify(&self, subject: &str, body: &str) -> Result<()>;
}

/// Mails notifications through SES.
pub struct SesNotifier {
    client: SesClient,
    sender: String,
    recipient: String,
}

impl SesNotifier {
    /// Notifier mailing from `sender` to `recipient`.
    pub fn new(sender: String, recipient: String, region: Region) -> Self {
        Self {
            client: SesClient::new(region),
            sender,
            recipient,
        }
    }
}

fn content(data: &str) -> Content {
    Content {
        data: data.to_owned(),
        charset: Some("UTF-8".to_owned()),
    }
}

#[async_trait]
impl Notifier for SesNotifier {
    async fn notify(&self, subject: &str, body: &str) -> Result<()> {
        let request = SendEmailRequest {
            source: self.sender.clone(),
            destination: Destination {
                to_addresses: Some(vec![self.recipient.clone()]),
                ..Default::default()
            },
            message: Message {
                subject: content(subject),
                body: Body {
                    text: Some(content(body)),
                    ..Default::default()
                },
            },
            ..Default::default()
        };
        self.client
            .send_email(request)
            .await
            .wrap_err("sending notification email")?;
        info!(subject, "Sent operational notification");
        Ok(())
    }
}

/// Fallback notifier when no recipient is configured: the notification is
/// only logged, at warn level so it still stands out in aggregation.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, subject: &str, body: &str) -> Result<()> {
        warn!(subject, body, "Operational notification (no email recipient configured)");
        Ok(())
    }
}
