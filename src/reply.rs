use crate::auth::AuthUser;
use crate::db::Database;
use crate::error::ApiError;
use crate::gateway::MailGateway;
use crate::models::{Address, Category, Email, Metadata, Priority, local_message_id};
use chrono::Utc;
use uuid::Uuid;

/// Idempotent "Re:" prefix: replying to an already-prefixed subject never
/// stacks another one.
pub fn reply_subject(subject: &str) -> String {
    if subject.starts_with("Re:") {
        subject.to_string()
    } else {
        format!("Re: {subject}")
    }
}

pub struct ReplyOutcome {
    pub reply: Email,
    pub delivered: bool,
}

/// Sends a reply to an owned email.
///
/// Ordered behavior: persist the reply first (category `sent`, linked to the
/// original, inheriting its thread), then attempt delivery through the
/// gateway. Delivery failure is logged and surfaced as `delivered = false`
/// but never rolls back the persisted reply. The original is flagged
/// `is_replied` last; the two writes are independent and a crash between
/// them leaves a reply without the flag, which readers must tolerate.
pub async fn send_reply(
    db: &Database,
    gateway: &dyn MailGateway,
    user: &AuthUser,
    original_id: &str,
    body: &str,
) -> Result<ReplyOutcome, ApiError> {
    let original = db
        .get_email(&user.id, original_id)
        .await?
        .ok_or(ApiError::NotFound("Original email not found"))?;

    let now = Utc::now();
    let mut reply = Email {
        id: Uuid::new_v4().to_string(),
        owner_id: user.id.clone(),
        from: Address::new(user.email.clone(), user.name.clone()),
        to: original.from.clone(),
        subject: reply_subject(&original.subject),
        body: body.to_string(),
        is_read: true,
        is_replied: false,
        priority: Priority::Normal,
        category: Category::Sent,
        original_email_id: Some(original.id.clone()),
        metadata: Metadata {
            message_id: local_message_id("reply"),
            thread_id: original.metadata.thread_id.clone(),
            ses_message_id: None,
            received_date: now,
        },
        analysis: None,
        created_at: now,
        replies: Vec::new(),
    };
    db.insert_email(&reply).await?;

    let mut delivered = false;
    match gateway
        .send_reply(&original.from, &original.subject, body, &user.signature)
        .await
    {
        Ok(receipt) => {
            db.set_ses_message_id(&user.id, &reply.id, &receipt.message_id)
                .await?;
            reply.metadata.ses_message_id = Some(receipt.message_id);
            delivered = true;
        }
        Err(err) => {
            // The reply stays persisted; delivery is best-effort.
            tracing::warn!(
                original_id = %original.id,
                reply_id = %reply.id,
                error = %err,
                "reply delivery failed, record kept"
            );
        }
    }

    db.set_replied(&user.id, &original.id, true).await?;

    Ok(ReplyOutcome { reply, delivered })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::mock::MockGateway;
    use pretty_assertions::assert_eq;

    fn user() -> AuthUser {
        AuthUser {
            id: "alice".to_string(),
            name: "Alice".to_string(),
            email: "alice@example.com".to_string(),
            signature: "-- Alice".to_string(),
        }
    }

    async fn seeded_original(db: &Database, subject: &str) -> Email {
        let email = Email::new_inbound(
            "alice",
            Address::new("sender@example.com", "Sender"),
            Address::new("alice@example.com", "Alice"),
            subject.to_string(),
            "original body".to_string(),
            Priority::Normal,
        );
        db.insert_email(&email).await.unwrap();
        email
    }

    #[test]
    fn subject_prefixing_is_idempotent() {
        assert_eq!(reply_subject("Hi"), "Re: Hi");
        assert_eq!(reply_subject("Re: Hi"), "Re: Hi");
    }

    #[tokio::test]
    async fn reply_links_thread_and_flags_original() {
        let db = Database::in_memory().await;
        let gateway = MockGateway::default();
        let original = seeded_original(&db, "Hi").await;

        let outcome = send_reply(&db, &gateway, &user(), &original.id, "Thanks")
            .await
            .unwrap();

        assert!(outcome.delivered);
        assert_eq!(outcome.reply.subject, "Re: Hi");
        assert_eq!(outcome.reply.category, Category::Sent);
        assert_eq!(outcome.reply.original_email_id.as_deref(), Some(original.id.as_str()));
        assert_eq!(outcome.reply.metadata.thread_id, original.metadata.thread_id);
        assert!(outcome.reply.metadata.ses_message_id.is_some());

        let original = db.get_email("alice", &original.id).await.unwrap().unwrap();
        assert!(original.is_replied);

        // The persisted copy carries the provider id too.
        let stored = db.get_email("alice", &outcome.reply.id).await.unwrap().unwrap();
        assert_eq!(stored.metadata.ses_message_id, outcome.reply.metadata.ses_message_id);

        // Delivery went to the original sender.
        let sent = gateway.sent.lock().unwrap();
        assert_eq!(sent[0].to, "sender@example.com");
    }

    #[tokio::test]
    async fn replying_to_a_reply_keeps_a_single_prefix() {
        let db = Database::in_memory().await;
        let gateway = MockGateway::default();
        let original = seeded_original(&db, "Hi").await;

        let first = send_reply(&db, &gateway, &user(), &original.id, "Thanks")
            .await
            .unwrap();
        let second = send_reply(&db, &gateway, &user(), &first.reply.id, "And again")
            .await
            .unwrap();

        assert_eq!(second.reply.subject, "Re: Hi");
        assert_eq!(second.reply.metadata.thread_id, original.metadata.thread_id);
    }

    #[tokio::test]
    async fn gateway_failure_keeps_reply_and_still_flags_original() {
        let db = Database::in_memory().await;
        let gateway = MockGateway::failing();
        let original = seeded_original(&db, "Hi").await;

        let outcome = send_reply(&db, &gateway, &user(), &original.id, "Thanks")
            .await
            .unwrap();

        assert!(!outcome.delivered);
        assert!(outcome.reply.metadata.ses_message_id.is_none());

        let stored = db.get_email("alice", &outcome.reply.id).await.unwrap().unwrap();
        assert!(stored.metadata.ses_message_id.is_none());
        let original = db.get_email("alice", &original.id).await.unwrap().unwrap();
        assert!(original.is_replied);
    }

    #[tokio::test]
    async fn replying_to_a_foreign_email_is_not_found() {
        let db = Database::in_memory().await;
        let gateway = MockGateway::default();
        let foreign = Email::new_inbound(
            "bob",
            Address::new("sender@example.com", ""),
            Address::new("bob@example.com", ""),
            "Hi".to_string(),
            "body".to_string(),
            Priority::Normal,
        );
        db.insert_email(&foreign).await.unwrap();

        let result = send_reply(&db, &gateway, &user(), &foreign.id, "Thanks").await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));
        assert!(gateway.sent.lock().unwrap().is_empty());
    }
}
