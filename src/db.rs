use crate::models::{
    Address, Analysis, BulkAction, Category, Email, EmailFilter, EmailUpdate, Metadata, Priority,
    Stats, User,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{Executor, QueryBuilder, Row, Sqlite};

/// Store handle. Every email operation takes the owner id as an explicit
/// argument; nothing is smuggled through request-scoped state.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        use sqlx::sqlite::SqliteConnectOptions;
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        let pool = SqlitePool::connect_with(options).await?;
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        let schema = include_str!("../schema.sql");
        self.pool.execute(schema).await?;
        Ok(())
    }

    /// Single-connection in-memory store for tests.
    #[cfg(test)]
    pub(crate) async fn in_memory() -> Self {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory database");
        let db = Self { pool };
        db.run_migrations().await.expect("schema");
        db
    }

    // ---- emails ----

    pub async fn insert_email(&self, email: &Email) -> Result<()> {
        sqlx::query(
            "INSERT INTO emails (id, owner_id, from_email, from_name, to_email, to_name, subject, body, \
             is_read, is_replied, priority, category, original_email_id, message_id, thread_id, \
             ses_message_id, analysis, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&email.id)
        .bind(&email.owner_id)
        .bind(&email.from.email)
        .bind(&email.from.name)
        .bind(&email.to.email)
        .bind(&email.to.name)
        .bind(&email.subject)
        .bind(&email.body)
        .bind(email.is_read)
        .bind(email.is_replied)
        .bind(email.priority.as_str())
        .bind(email.category.as_str())
        .bind(&email.original_email_id)
        .bind(&email.metadata.message_id)
        .bind(&email.metadata.thread_id)
        .bind(&email.metadata.ses_message_id)
        .bind(
            email
                .analysis
                .as_ref()
                .map(|a| serde_json::to_string(a))
                .transpose()?,
        )
        .bind(email.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_email(&self, owner_id: &str, id: &str) -> Result<Option<Email>> {
        let row = sqlx::query("SELECT * FROM emails WHERE owner_id = ? AND id = ?")
            .bind(owner_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| email_from_row(&row)))
    }

    /// The computed `replies` relation: every owned email replying to `id`.
    pub async fn replies_for(&self, owner_id: &str, id: &str) -> Result<Vec<Email>> {
        let rows = sqlx::query(
            "SELECT * FROM emails WHERE owner_id = ? AND original_email_id = ? \
             ORDER BY created_at ASC, id ASC",
        )
        .bind(owner_id)
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(email_from_row).collect())
    }

    pub async fn list_emails(
        &self,
        owner_id: &str,
        filter: &EmailFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Email>> {
        let mut qb = QueryBuilder::new("SELECT * FROM emails WHERE ");
        push_filters(&mut qb, owner_id, filter);
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ");
        qb.push_bind(limit);
        qb.push(" OFFSET ");
        qb.push_bind(offset);

        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(rows.iter().map(email_from_row).collect())
    }

    pub async fn count_emails(&self, owner_id: &str, filter: &EmailFilter) -> Result<i64> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM emails WHERE ");
        push_filters(&mut qb, owner_id, filter);
        let row = qb.build().fetch_one(&self.pool).await?;
        Ok(row.get(0))
    }

    /// Unread badge: inbox-only, unaffected by any active list filter.
    pub async fn unread_inbox_count(&self, owner_id: &str) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) FROM emails WHERE owner_id = ? AND category = 'inbox' AND is_read = 0",
        )
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get(0))
    }

    pub async fn set_read(&self, owner_id: &str, id: &str, is_read: bool) -> Result<()> {
        sqlx::query("UPDATE emails SET is_read = ? WHERE owner_id = ? AND id = ?")
            .bind(is_read)
            .bind(owner_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_replied(&self, owner_id: &str, id: &str, is_replied: bool) -> Result<()> {
        sqlx::query("UPDATE emails SET is_replied = ? WHERE owner_id = ? AND id = ?")
            .bind(is_replied)
            .bind(owner_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Records the provider message id after a successful gateway send.
    pub async fn set_ses_message_id(
        &self,
        owner_id: &str,
        id: &str,
        ses_message_id: &str,
    ) -> Result<()> {
        sqlx::query("UPDATE emails SET ses_message_id = ? WHERE owner_id = ? AND id = ?")
            .bind(ses_message_id)
            .bind(owner_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_analysis(&self, owner_id: &str, id: &str, analysis: &Analysis) -> Result<bool> {
        let result = sqlx::query("UPDATE emails SET analysis = ? WHERE owner_id = ? AND id = ?")
            .bind(serde_json::to_string(analysis)?)
            .bind(owner_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Applies a tagged partial update and returns the updated email.
    /// `None` when the email does not exist for this owner.
    pub async fn update_email(
        &self,
        owner_id: &str,
        id: &str,
        update: &EmailUpdate,
    ) -> Result<Option<Email>> {
        let Some(mut email) = self.get_email(owner_id, id).await? else {
            return Ok(None);
        };

        if let Some(is_read) = update.is_read {
            email.is_read = is_read;
        }
        if let Some(category) = update.category {
            email.category = category;
        }
        if let Some(priority) = update.priority {
            email.priority = priority;
        }

        sqlx::query(
            "UPDATE emails SET is_read = ?, category = ?, priority = ? \
             WHERE owner_id = ? AND id = ?",
        )
        .bind(email.is_read)
        .bind(email.category.as_str())
        .bind(email.priority.as_str())
        .bind(owner_id)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(Some(email))
    }

    /// Permanent removal. Surviving replies keep their dangling
    /// `original_email_id`; nothing cascades.
    pub async fn delete_email(&self, owner_id: &str, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM emails WHERE owner_id = ? AND id = ?")
            .bind(owner_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// One multi-document statement. Ids outside the owner scope simply
    /// never match, so they are silently excluded.
    pub async fn bulk_update(
        &self,
        owner_id: &str,
        ids: &[String],
        action: BulkAction,
    ) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut qb = match action {
            BulkAction::Read => QueryBuilder::new("UPDATE emails SET is_read = 1 WHERE owner_id = "),
            BulkAction::Unread => {
                QueryBuilder::new("UPDATE emails SET is_read = 0 WHERE owner_id = ")
            }
            BulkAction::Archive => {
                QueryBuilder::new("UPDATE emails SET category = 'archive' WHERE owner_id = ")
            }
            BulkAction::Trash => {
                QueryBuilder::new("UPDATE emails SET category = 'trash' WHERE owner_id = ")
            }
            BulkAction::Delete => QueryBuilder::new("DELETE FROM emails WHERE owner_id = "),
        };
        qb.push_bind(owner_id);
        qb.push(" AND id IN (");
        {
            let mut separated = qb.separated(", ");
            for id in ids {
                separated.push_bind(id);
            }
        }
        qb.push(")");

        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    pub async fn stats(&self, owner_id: &str) -> Result<Stats> {
        let row = sqlx::query(
            "SELECT COUNT(*), \
             COALESCE(SUM(CASE WHEN is_read = 0 THEN 1 ELSE 0 END), 0), \
             COALESCE(SUM(CASE WHEN is_replied = 1 THEN 1 ELSE 0 END), 0), \
             COALESCE(SUM(CASE WHEN category = 'inbox' THEN 1 ELSE 0 END), 0), \
             COALESCE(SUM(CASE WHEN category = 'sent' THEN 1 ELSE 0 END), 0), \
             COALESCE(SUM(CASE WHEN category = 'draft' THEN 1 ELSE 0 END), 0), \
             COALESCE(SUM(CASE WHEN category = 'archive' THEN 1 ELSE 0 END), 0), \
             COALESCE(SUM(CASE WHEN category = 'trash' THEN 1 ELSE 0 END), 0) \
             FROM emails WHERE owner_id = ?",
        )
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(Stats {
            total_emails: row.get(0),
            unread_emails: row.get(1),
            replied_emails: row.get(2),
            inbox_emails: row.get(3),
            sent_emails: row.get(4),
            draft_emails: row.get(5),
            archived_emails: row.get(6),
            trashed_emails: row.get(7),
        })
    }

    // ---- users ----

    pub async fn insert_user(&self, user: &User) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (id, name, email, password_hash, signature, api_token, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.signature)
        .bind(&user.api_token)
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| user_from_row(&row)))
    }

    pub async fn user_by_token(&self, token: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE api_token = ?")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| user_from_row(&row)))
    }

    pub async fn set_token(&self, user_id: &str, token: &str) -> Result<()> {
        sqlx::query("UPDATE users SET api_token = ? WHERE id = ?")
            .bind(token)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn push_filters<'a>(qb: &mut QueryBuilder<'a, Sqlite>, owner_id: &'a str, filter: &'a EmailFilter) {
    qb.push("owner_id = ");
    qb.push_bind(owner_id);

    if let Some(category) = filter.category {
        qb.push(" AND category = ");
        qb.push_bind(category.as_str());
    }
    if let Some(is_read) = filter.is_read {
        qb.push(" AND is_read = ");
        qb.push_bind(is_read);
    }
    if let Some(search) = filter.search.as_deref() {
        let pattern = like_pattern(search);
        qb.push(" AND (subject LIKE ");
        qb.push_bind(pattern.clone());
        qb.push(" ESCAPE '\\' OR body LIKE ");
        qb.push_bind(pattern.clone());
        qb.push(" ESCAPE '\\' OR from_email LIKE ");
        qb.push_bind(pattern);
        qb.push(" ESCAPE '\\')");
    }
}

/// Case-insensitive substring match with LIKE wildcards escaped.
fn like_pattern(search: &str) -> String {
    let escaped = search
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

fn email_from_row(row: &SqliteRow) -> Email {
    let analysis: Option<String> = row.get("analysis");
    Email {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        from: Address {
            email: row.get("from_email"),
            name: row.get("from_name"),
        },
        to: Address {
            email: row.get("to_email"),
            name: row.get("to_name"),
        },
        subject: row.get("subject"),
        body: row.get("body"),
        is_read: row.get("is_read"),
        is_replied: row.get("is_replied"),
        priority: Priority::parse(row.get("priority")).unwrap_or(Priority::Normal),
        category: Category::parse(row.get("category")).unwrap_or(Category::Inbox),
        original_email_id: row.get("original_email_id"),
        metadata: Metadata {
            message_id: row.get("message_id"),
            thread_id: row.get("thread_id"),
            ses_message_id: row.get("ses_message_id"),
            received_date: row.get::<DateTime<Utc>, _>("created_at"),
        },
        analysis: analysis.and_then(|raw| serde_json::from_str(&raw).ok()),
        created_at: row.get("created_at"),
        replies: Vec::new(),
    }
}

fn user_from_row(row: &SqliteRow) -> User {
    User {
        id: row.get("id"),
        name: row.get("name"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        signature: row.get("signature"),
        api_token: row.get("api_token"),
        created_at: row.get("created_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn seed(db: &Database, owner: &str, subject: &str, category: Category) -> Email {
        let mut email = Email::new_inbound(
            owner,
            Address::new("sender@example.com", "Sender"),
            Address::new("owner@example.com", "Owner"),
            subject.to_string(),
            format!("body of {subject}"),
            Priority::Normal,
        );
        email.category = category;
        db.insert_email(&email).await.unwrap();
        email
    }

    #[tokio::test]
    async fn get_email_is_owner_scoped() {
        let db = Database::in_memory().await;
        let email = seed(&db, "alice", "Hi", Category::Inbox).await;

        assert!(db.get_email("alice", &email.id).await.unwrap().is_some());
        assert!(db.get_email("bob", &email.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_is_owner_scoped_and_permanent() {
        let db = Database::in_memory().await;
        let email = seed(&db, "alice", "Hi", Category::Inbox).await;

        assert!(!db.delete_email("bob", &email.id).await.unwrap());
        assert!(db.delete_email("alice", &email.id).await.unwrap());
        assert!(db.get_email("alice", &email.id).await.unwrap().is_none());
        // Repeat delete reports nothing removed.
        assert!(!db.delete_email("alice", &email.id).await.unwrap());
    }

    #[tokio::test]
    async fn bulk_action_only_touches_owned_subset() {
        let db = Database::in_memory().await;
        let mine = seed(&db, "alice", "Mine", Category::Inbox).await;
        let theirs = seed(&db, "bob", "Theirs", Category::Inbox).await;

        let affected = db
            .bulk_update(
                "alice",
                &[mine.id.clone(), theirs.id.clone(), "missing".to_string()],
                BulkAction::Archive,
            )
            .await
            .unwrap();
        assert_eq!(affected, 1);

        let mine = db.get_email("alice", &mine.id).await.unwrap().unwrap();
        assert_eq!(mine.category, Category::Archive);
        let theirs = db.get_email("bob", &theirs.id).await.unwrap().unwrap();
        assert_eq!(theirs.category, Category::Inbox);
    }

    #[tokio::test]
    async fn bulk_read_and_unread_flip_flags() {
        let db = Database::in_memory().await;
        let a = seed(&db, "alice", "A", Category::Inbox).await;
        let b = seed(&db, "alice", "B", Category::Inbox).await;
        let ids = vec![a.id.clone(), b.id.clone()];

        assert_eq!(db.bulk_update("alice", &ids, BulkAction::Read).await.unwrap(), 2);
        assert!(db.get_email("alice", &a.id).await.unwrap().unwrap().is_read);

        assert_eq!(db.bulk_update("alice", &ids, BulkAction::Unread).await.unwrap(), 2);
        assert!(!db.get_email("alice", &b.id).await.unwrap().unwrap().is_read);
    }

    #[tokio::test]
    async fn bulk_delete_removes_matching_documents() {
        let db = Database::in_memory().await;
        let a = seed(&db, "alice", "A", Category::Inbox).await;
        let b = seed(&db, "alice", "B", Category::Inbox).await;

        let affected = db
            .bulk_update("alice", &[a.id.clone()], BulkAction::Delete)
            .await
            .unwrap();
        assert_eq!(affected, 1);
        assert!(db.get_email("alice", &a.id).await.unwrap().is_none());
        assert!(db.get_email("alice", &b.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unread_count_ignores_other_categories_and_filters() {
        let db = Database::in_memory().await;
        seed(&db, "alice", "Unread inbox", Category::Inbox).await;
        let read = seed(&db, "alice", "Read inbox", Category::Inbox).await;
        db.set_read("alice", &read.id, true).await.unwrap();
        seed(&db, "alice", "Archived", Category::Archive).await;
        seed(&db, "bob", "Someone else", Category::Inbox).await;

        assert_eq!(db.unread_inbox_count("alice").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn list_filters_compose_with_owner_scope() {
        let db = Database::in_memory().await;
        seed(&db, "alice", "Quarterly report", Category::Inbox).await;
        seed(&db, "alice", "Lunch plans", Category::Archive).await;
        seed(&db, "bob", "Quarterly report", Category::Inbox).await;

        let filter = EmailFilter {
            category: Some(Category::Inbox),
            ..Default::default()
        };
        let emails = db.list_emails("alice", &filter, 20, 0).await.unwrap();
        assert_eq!(emails.len(), 1);
        assert_eq!(emails[0].subject, "Quarterly report");

        let filter = EmailFilter {
            search: Some("quarterly".to_string()),
            ..Default::default()
        };
        assert_eq!(db.count_emails("alice", &filter).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn search_matches_subject_body_and_sender() {
        let db = Database::in_memory().await;
        let mut email = Email::new_inbound(
            "alice",
            Address::new("thanks-dept@example.com", ""),
            Address::new("owner@example.com", ""),
            "Hello".to_string(),
            "Nothing of note".to_string(),
            Priority::Normal,
        );
        db.insert_email(&email).await.unwrap();

        // Sender address matches.
        let filter = EmailFilter {
            search: Some("THANKS".to_string()),
            ..Default::default()
        };
        assert_eq!(db.count_emails("alice", &filter).await.unwrap(), 1);

        // Literal wildcard characters do not match everything.
        email.id = "second".to_string();
        email.metadata.thread_id = "second".to_string();
        db.insert_email(&email).await.unwrap();
        let filter = EmailFilter {
            search: Some("100%".to_string()),
            ..Default::default()
        };
        assert_eq!(db.count_emails("alice", &filter).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn update_email_applies_only_present_fields() {
        let db = Database::in_memory().await;
        let email = seed(&db, "alice", "Hi", Category::Inbox).await;

        let update = EmailUpdate {
            priority: Some(Priority::High),
            ..Default::default()
        };
        let updated = db
            .update_email("alice", &email.id, &update)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.priority, Priority::High);
        assert_eq!(updated.category, Category::Inbox);
        assert!(!updated.is_read);

        assert!(db.update_email("bob", &email.id, &update).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stats_cover_flags_and_categories() {
        let db = Database::in_memory().await;
        let read = seed(&db, "alice", "A", Category::Inbox).await;
        db.set_read("alice", &read.id, true).await.unwrap();
        db.set_replied("alice", &read.id, true).await.unwrap();
        seed(&db, "alice", "B", Category::Sent).await;
        seed(&db, "alice", "C", Category::Trash).await;
        seed(&db, "bob", "D", Category::Inbox).await;

        let stats = db.stats("alice").await.unwrap();
        assert_eq!(stats.total_emails, 3);
        assert_eq!(stats.unread_emails, 2);
        assert_eq!(stats.replied_emails, 1);
        assert_eq!(stats.inbox_emails, 1);
        assert_eq!(stats.sent_emails, 1);
        assert_eq!(stats.trashed_emails, 1);
        assert_eq!(stats.archived_emails, 0);
    }

    #[tokio::test]
    async fn analysis_round_trips_as_json() {
        let db = Database::in_memory().await;
        let email = seed(&db, "alice", "Hi", Category::Inbox).await;
        let analysis = Analysis {
            sentiment: "positive".to_string(),
            urgency: "low".to_string(),
            keywords: vec!["greeting".to_string()],
            summary: "A friendly hello".to_string(),
        };

        assert!(db.set_analysis("alice", &email.id, &analysis).await.unwrap());
        assert!(!db.set_analysis("bob", &email.id, &analysis).await.unwrap());

        let stored = db.get_email("alice", &email.id).await.unwrap().unwrap();
        let stored = stored.analysis.unwrap();
        assert_eq!(stored.sentiment, "positive");
        assert_eq!(stored.keywords, vec!["greeting".to_string()]);
    }
}
