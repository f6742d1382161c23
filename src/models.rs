use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An email endpoint: address plus optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub email: String,
    #[serde(default)]
    pub name: String,
}

impl Address {
    pub fn new(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Priority::Low),
            "normal" => Some(Priority::Normal),
            "high" => Some(Priority::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Inbox,
    Sent,
    Draft,
    Archive,
    Trash,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Inbox => "inbox",
            Category::Sent => "sent",
            Category::Draft => "draft",
            Category::Archive => "archive",
            Category::Trash => "trash",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "inbox" => Some(Category::Inbox),
            "sent" => Some(Category::Sent),
            "draft" => Some(Category::Draft),
            "archive" => Some(Category::Archive),
            "trash" => Some(Category::Trash),
            _ => None,
        }
    }
}

/// One state change applied to a caller-supplied set of email ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkAction {
    Read,
    Unread,
    Archive,
    Trash,
    Delete,
}

impl BulkAction {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "read" => Some(BulkAction::Read),
            "unread" => Some(BulkAction::Unread),
            "archive" => Some(BulkAction::Archive),
            "trash" => Some(BulkAction::Trash),
            "delete" => Some(BulkAction::Delete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BulkAction::Read => "read",
            BulkAction::Unread => "unread",
            BulkAction::Archive => "archive",
            BulkAction::Trash => "trash",
            BulkAction::Delete => "delete",
        }
    }
}

/// Provider trace and thread linkage for one email.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub message_id: String,
    pub thread_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ses_message_id: Option<String>,
    pub received_date: DateTime<Utc>,
}

/// Optional LLM annotation, independent of the email lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub sentiment: String,
    pub urgency: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub summary: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Email {
    pub id: String,
    pub owner_id: String,
    pub from: Address,
    pub to: Address,
    pub subject: String,
    pub body: String,
    pub is_read: bool,
    pub is_replied: bool,
    pub priority: Priority,
    pub category: Category,
    pub original_email_id: Option<String>,
    pub metadata: Metadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Analysis>,
    pub created_at: DateTime<Utc>,
    /// All emails whose `original_email_id` equals this id. Computed on the
    /// individual read path, never stored.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub replies: Vec<Email>,
}

impl Email {
    /// A simulated inbound email addressed to its owner. Roots its own thread.
    pub fn new_inbound(
        owner_id: &str,
        from: Address,
        to: Address,
        subject: String,
        body: String,
        priority: Priority,
    ) -> Self {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        Self {
            id: id.clone(),
            owner_id: owner_id.to_string(),
            from,
            to,
            subject,
            body,
            is_read: false,
            is_replied: false,
            priority,
            category: Category::Inbox,
            original_email_id: None,
            metadata: Metadata {
                message_id: local_message_id("msg"),
                thread_id: id,
                ses_message_id: None,
                received_date: now,
            },
            analysis: None,
            created_at: now,
            replies: Vec::new(),
        }
    }
}

/// Locally generated message id, `<prefix>_<millis>_<suffix>`.
pub fn local_message_id(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}",
        prefix,
        Utc::now().timestamp_millis(),
        &suffix[..9]
    )
}

/// A mailbox owner. The password hash and API token never leave the server;
/// the wire shape is [`User::profile`].
#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub signature: String,
    pub api_token: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn profile(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "name": self.name,
            "email": self.email,
            "signature": self.signature,
        })
    }
}

/// Tagged partial update for PUT: a field is touched only when present.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailUpdate {
    pub is_read: Option<bool>,
    pub category: Option<Category>,
    pub priority: Option<Priority>,
}

/// Filters for the list endpoint, always conjoined with the owner scope.
#[derive(Debug, Clone, Default)]
pub struct EmailFilter {
    pub category: Option<Category>,
    pub is_read: Option<bool>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total_emails: i64,
    pub unread_emails: i64,
    pub replied_emails: i64,
    pub inbox_emails: i64,
    pub sent_emails: i64,
    pub draft_emails: i64,
    pub archived_emails: i64,
    pub trashed_emails: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_round_trips_through_str() {
        for cat in [
            Category::Inbox,
            Category::Sent,
            Category::Draft,
            Category::Archive,
            Category::Trash,
        ] {
            assert_eq!(Category::parse(cat.as_str()), Some(cat));
        }
        assert_eq!(Category::parse("spam"), None);
    }

    #[test]
    fn bulk_action_rejects_unknown_values() {
        assert_eq!(BulkAction::parse("archive"), Some(BulkAction::Archive));
        assert_eq!(BulkAction::parse("star"), None);
    }

    #[test]
    fn inbound_email_roots_its_own_thread() {
        let email = Email::new_inbound(
            "u1",
            Address::new("a@example.com", "A"),
            Address::new("b@example.com", "B"),
            "Hi".into(),
            "Hello".into(),
            Priority::Normal,
        );
        assert_eq!(email.metadata.thread_id, email.id);
        assert_eq!(email.category, Category::Inbox);
        assert!(!email.is_read);
        assert!(email.metadata.message_id.starts_with("msg_"));
    }
}
