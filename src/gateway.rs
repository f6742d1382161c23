use crate::config::SmtpConfig;
use crate::models::{Address, local_message_id};
use crate::reply::reply_subject;
use anyhow::Result;
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::response::Response;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("mail gateway error: {0}")]
pub struct GatewayError(pub String);

/// Provider acknowledgment for one accepted message.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    pub message_id: String,
}

/// Transactional email provider. A successful persistence of a reply never
/// implies this succeeded; callers handle failure as a degraded, non-fatal
/// outcome.
#[async_trait]
pub trait MailGateway: Send + Sync {
    async fn send(
        &self,
        to: &Address,
        subject: &str,
        text_body: &str,
        reply_to: Option<&str>,
    ) -> Result<SendReceipt, GatewayError>;

    /// Composes and delivers a reply: idempotent "Re:" prefix, signature
    /// appended below the body.
    async fn send_reply(
        &self,
        to: &Address,
        subject: &str,
        body: &str,
        signature: &str,
    ) -> Result<SendReceipt, GatewayError> {
        let subject = reply_subject(subject);
        let text = if signature.is_empty() {
            body.to_string()
        } else {
            format!("{body}\n\n{signature}")
        };
        self.send(to, &subject, &text, None).await
    }
}

/// SMTP relay implementation (SES or any transactional SMTP endpoint).
pub struct SmtpGateway {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpGateway {
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?;
        if let Some(port) = config.port {
            builder = builder.port(port);
        }
        let transport = builder
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build();

        let name = (!config.from_name.is_empty()).then(|| config.from_name.clone());
        let from = Mailbox::new(name, config.from_email.parse()?);
        Ok(Self { transport, from })
    }
}

#[async_trait]
impl MailGateway for SmtpGateway {
    async fn send(
        &self,
        to: &Address,
        subject: &str,
        text_body: &str,
        reply_to: Option<&str>,
    ) -> Result<SendReceipt, GatewayError> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .to(mailbox(to)?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN);
        if let Some(address) = reply_to {
            let address = address
                .parse()
                .map_err(|err| GatewayError(format!("invalid reply-to address: {err}")))?;
            builder = builder.reply_to(Mailbox::new(None, address));
        }
        let message = builder
            .body(text_body.to_string())
            .map_err(|err| GatewayError(err.to_string()))?;

        let response = self
            .transport
            .send(message)
            .await
            .map_err(|err| GatewayError(err.to_string()))?;
        Ok(SendReceipt {
            message_id: receipt_id(&response),
        })
    }
}

/// The relay's queue id from the final response line, e.g. SES answers
/// "250 Ok <message-id>". Falls back to a locally generated id.
fn receipt_id(response: &Response) -> String {
    response
        .message()
        .last()
        .and_then(|line| line.split_whitespace().last())
        .map(str::to_string)
        .unwrap_or_else(|| local_message_id("smtp"))
}

fn mailbox(address: &Address) -> Result<Mailbox, GatewayError> {
    let parsed = address
        .email
        .parse()
        .map_err(|err| GatewayError(format!("invalid recipient address: {err}")))?;
    let name = (!address.name.is_empty()).then(|| address.name.clone());
    Ok(Mailbox::new(name, parsed))
}

/// Stand-in when no SMTP relay is configured: every send fails with an
/// upstream error, which the reply engine tolerates.
pub struct DisabledGateway;

#[async_trait]
impl MailGateway for DisabledGateway {
    async fn send(
        &self,
        _to: &Address,
        _subject: &str,
        _text_body: &str,
        _reply_to: Option<&str>,
    ) -> Result<SendReceipt, GatewayError> {
        Err(GatewayError("outbound mail is not configured".to_string()))
    }
}


#[cfg(test)]
mod tests {
    use super::mock::MockGateway;
    use super::*;

    #[tokio::test]
    async fn send_reply_prefixes_subject_and_appends_signature() {
        let gateway = MockGateway::default();
        let to = Address::new("sender@example.com", "Sender");

        gateway
            .send_reply(&to, "Hi", "Thanks!", "-- Alice")
            .await
            .unwrap();
        gateway
            .send_reply(&to, "Re: Hi", "Thanks again!", "")
            .await
            .unwrap();

        let sent = gateway.sent.lock().unwrap();
        assert_eq!(sent[0].subject, "Re: Hi");
        assert_eq!(sent[0].body, "Thanks!\n\n-- Alice");
        assert_eq!(sent[1].subject, "Re: Hi");
        assert_eq!(sent[1].body, "Thanks again!");
    }

    #[tokio::test]
    async fn disabled_gateway_always_fails() {
        let gateway = DisabledGateway;
        let result = gateway
            .send(&Address::new("a@example.com", ""), "Hi", "body", None)
            .await;
        assert!(result.is_err());
    }
}
