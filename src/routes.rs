use crate::auth::{self, AuthUser};
use crate::db::Database;
use crate::error::{ApiError, ValidationIssue};
use crate::gateway::MailGateway;
use crate::llm::LlmClient;
use crate::models::{
    Address, BulkAction, Category, Email, EmailFilter, EmailUpdate, Priority, User,
};
use crate::reply;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\S+@\S+\.\S+$").unwrap());

const TONES: [&str; 4] = ["professional", "friendly", "formal", "casual"];

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub gateway: Arc<dyn MailGateway>,
    pub llm: Option<LlmClient>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/me", get(me))
        .route("/api/emails", get(list_emails).post(create_email))
        .route("/api/emails/stats/overview", get(stats_overview))
        .route("/api/emails/bulk-action", post(bulk_action))
        .route(
            "/api/emails/:id",
            get(get_email).put(update_email).delete(delete_email),
        )
        .route("/api/emails/:id/reply", post(send_reply))
        .route("/api/assistant/generate-reply", post(generate_reply))
        .route("/api/assistant/analyze-email", post(analyze_email))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "OK", "timestamp": Utc::now() }))
}

// ---- auth ----

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    signature: String,
}

async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut errors = Vec::new();
    let name_len = request.name.trim().chars().count();
    if name_len < 2 || name_len > 50 {
        errors.push(ValidationIssue::new(
            "name",
            "Name must be between 2 and 50 characters",
        ));
    }
    if !EMAIL_RE.is_match(&request.email) {
        errors.push(ValidationIssue::new("email", "Please provide a valid email"));
    }
    if request.password.chars().count() < 6 {
        errors.push(ValidationIssue::new(
            "password",
            "Password must be at least 6 characters long",
        ));
    }
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }

    if state.db.user_by_email(&request.email).await?.is_some() {
        return Err(ApiError::Validation(vec![ValidationIssue::new(
            "email",
            "Email is already registered",
        )]));
    }

    let token = auth::issue_token();
    let user = User {
        id: Uuid::new_v4().to_string(),
        name: request.name.trim().to_string(),
        email: request.email,
        password_hash: auth::hash_password(&request.password),
        signature: request.signature,
        api_token: Some(token.clone()),
        created_at: Utc::now(),
    };
    state.db.insert_user(&user).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "token": token, "user": user.profile() })),
    ))
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .db
        .user_by_email(&request.email)
        .await?
        .filter(|user| auth::verify_password(&request.password, &user.password_hash))
        .ok_or(ApiError::Auth("Invalid email or password"))?;

    // Token rotation on every login.
    let token = auth::issue_token();
    state.db.set_token(&user.id, &token).await?;

    Ok(Json(json!({ "token": token, "user": user.profile() })))
}

async fn me(user: AuthUser) -> impl IntoResponse {
    Json(json!({ "user": {
        "id": user.id,
        "name": user.name,
        "email": user.email,
        "signature": user.signature,
    }}))
}

// ---- emails ----

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    page: Option<String>,
    limit: Option<String>,
    category: Option<String>,
    is_read: Option<String>,
    search: Option<String>,
}

async fn list_emails(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let mut errors = Vec::new();

    let page = match query.page.as_deref() {
        None => 1,
        Some(raw) => match raw.parse::<i64>() {
            Ok(page) if page >= 1 => page,
            _ => {
                errors.push(ValidationIssue::new("page", "Page must be a positive integer"));
                1
            }
        },
    };
    let limit = match query.limit.as_deref() {
        None => 20,
        Some(raw) => match raw.parse::<i64>() {
            Ok(limit) if (1..=100).contains(&limit) => limit,
            _ => {
                errors.push(ValidationIssue::new("limit", "Limit must be between 1 and 100"));
                20
            }
        },
    };

    let mut filter = EmailFilter::default();
    if let Some(raw) = query.category.as_deref() {
        match Category::parse(raw) {
            Some(category) => filter.category = Some(category),
            None => errors.push(ValidationIssue::new("category", "Invalid category")),
        }
    }
    if let Some(raw) = query.is_read.as_deref() {
        match raw {
            "true" => filter.is_read = Some(true),
            "false" => filter.is_read = Some(false),
            _ => errors.push(ValidationIssue::new("isRead", "isRead must be a boolean")),
        }
    }
    if let Some(search) = query.search {
        if search.chars().count() > 100 {
            errors.push(ValidationIssue::new(
                "search",
                "Search cannot exceed 100 characters",
            ));
        } else if !search.is_empty() {
            filter.search = Some(search);
        }
    }

    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }

    let offset = (page - 1) * limit;
    let (emails, total, unread_count) = futures::try_join!(
        state.db.list_emails(&user.id, &filter, limit, offset),
        state.db.count_emails(&user.id, &filter),
        state.db.unread_inbox_count(&user.id),
    )?;

    let total_pages = (total + limit - 1) / limit;
    Ok(Json(json!({
        "emails": emails,
        "pagination": {
            "currentPage": page,
            "totalPages": total_pages,
            "totalEmails": total,
            "hasNext": page < total_pages,
            "hasPrev": page > 1,
        },
        "unreadCount": unread_count,
    })))
}

/// Individual fetch: populates the computed reply relation and marks the
/// email read. The mark-read side effect is intentional.
async fn get_email(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(mut email) = state.db.get_email(&user.id, &id).await? else {
        return Err(ApiError::NotFound("Email not found"));
    };

    if !email.is_read {
        state.db.set_read(&user.id, &email.id, true).await?;
        email.is_read = true;
    }
    email.replies = state.db.replies_for(&user.id, &email.id).await?;

    Ok(Json(json!({ "email": email })))
}

#[derive(Debug, Deserialize)]
struct CreateEmailRequest {
    from: Option<AddressInput>,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    body: String,
    priority: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AddressInput {
    #[serde(default)]
    email: String,
    #[serde(default)]
    name: String,
}

/// Simulated inbound delivery: the created email lands in the caller's
/// inbox, addressed to the caller.
async fn create_email(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CreateEmailRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut errors = Vec::new();

    let from = request.from.unwrap_or(AddressInput {
        email: String::new(),
        name: String::new(),
    });
    if !EMAIL_RE.is_match(&from.email) {
        errors.push(ValidationIssue::new(
            "from.email",
            "Valid from email is required",
        ));
    }
    if from.name.chars().count() > 100 {
        errors.push(ValidationIssue::new(
            "from.name",
            "Name cannot exceed 100 characters",
        ));
    }
    if request.subject.is_empty() || request.subject.chars().count() > 200 {
        errors.push(ValidationIssue::new(
            "subject",
            "Subject is required and cannot exceed 200 characters",
        ));
    }
    if request.body.is_empty() || request.body.chars().count() > 10000 {
        errors.push(ValidationIssue::new(
            "body",
            "Body is required and cannot exceed 10000 characters",
        ));
    }
    let priority = match request.priority.as_deref() {
        None => Priority::Normal,
        Some(raw) => Priority::parse(raw).unwrap_or_else(|| {
            errors.push(ValidationIssue::new("priority", "Invalid priority"));
            Priority::Normal
        }),
    };
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }

    let email = Email::new_inbound(
        &user.id,
        Address::new(from.email, from.name.trim().to_string()),
        Address::new(user.email.clone(), user.name.clone()),
        request.subject,
        request.body,
        priority,
    );
    state.db.insert_email(&email).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Email created successfully", "email": email })),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplyRequest {
    #[serde(default)]
    body: String,
    #[serde(default)]
    use_generated: bool,
}

async fn send_reply(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(request): Json<ReplyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.body.is_empty() || request.body.chars().count() > 10000 {
        return Err(ApiError::Validation(vec![ValidationIssue::new(
            "body",
            "Reply body is required and cannot exceed 10000 characters",
        )]));
    }
    if request.use_generated {
        tracing::debug!(email_id = %id, "sending an assistant-generated reply");
    }

    let outcome = reply::send_reply(&state.db, state.gateway.as_ref(), &user, &id, &request.body)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Reply sent successfully",
            "reply": outcome.reply,
            "sesMessageId": outcome.reply.metadata.ses_message_id,
            "delivered": outcome.delivered,
        })),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateEmailRequest {
    is_read: Option<bool>,
    category: Option<String>,
    priority: Option<String>,
}

async fn update_email(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(request): Json<UpdateEmailRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut errors = Vec::new();
    let mut update = EmailUpdate {
        is_read: request.is_read,
        ..Default::default()
    };
    if let Some(raw) = request.category.as_deref() {
        match Category::parse(raw) {
            Some(category) => update.category = Some(category),
            None => errors.push(ValidationIssue::new("category", "Invalid category")),
        }
    }
    if let Some(raw) = request.priority.as_deref() {
        match Priority::parse(raw) {
            Some(priority) => update.priority = Some(priority),
            None => errors.push(ValidationIssue::new("priority", "Invalid priority")),
        }
    }
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }

    let email = state
        .db
        .update_email(&user.id, &id, &update)
        .await?
        .ok_or(ApiError::NotFound("Email not found"))?;

    Ok(Json(json!({ "message": "Email updated successfully", "email": email })))
}

async fn delete_email(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.db.delete_email(&user.id, &id).await? {
        return Err(ApiError::NotFound("Email not found"));
    }
    Ok(Json(json!({ "message": "Email deleted successfully" })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BulkActionRequest {
    #[serde(default)]
    email_ids: Vec<String>,
    #[serde(default)]
    action: String,
}

async fn bulk_action(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<BulkActionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // Unknown actions are rejected before any document is touched.
    let action = BulkAction::parse(&request.action).ok_or_else(|| {
        ApiError::Validation(vec![ValidationIssue::new("action", "Invalid action")])
    })?;

    let affected = state
        .db
        .bulk_update(&user.id, &request.email_ids, action)
        .await?;

    Ok(Json(json!({
        "message": format!("Bulk {} completed successfully", action.as_str()),
        "affected": affected,
    })))
}

async fn stats_overview(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let stats = state.db.stats(&user.id).await?;
    Ok(Json(json!({ "stats": stats })))
}

// ---- assistant ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateReplyRequest {
    #[serde(default)]
    original_message: String,
    #[serde(default)]
    context: String,
    tone: Option<String>,
}

async fn generate_reply(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<GenerateReplyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let llm = state
        .llm
        .as_ref()
        .ok_or_else(|| ApiError::Upstream("LLM API is not configured".to_string()))?;

    let mut errors = Vec::new();
    if request.original_message.is_empty() || request.original_message.chars().count() > 10000 {
        errors.push(ValidationIssue::new(
            "originalMessage",
            "Original message is required and cannot exceed 10000 characters",
        ));
    }
    if request.context.chars().count() > 1000 {
        errors.push(ValidationIssue::new(
            "context",
            "Context cannot exceed 1000 characters",
        ));
    }
    let tone = request.tone.as_deref().unwrap_or("professional");
    if !TONES.contains(&tone) {
        errors.push(ValidationIssue::new(
            "tone",
            "Tone must be one of: professional, friendly, formal, casual",
        ));
    }
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }

    let generated = llm
        .generate_reply(&request.original_message, &request.context, tone, &user.signature)
        .await?;

    Ok(Json(json!({
        "success": true,
        "generatedReply": generated.text,
        "metadata": {
            "model": llm.model(),
            "tokensUsed": generated.tokens_used,
            "tone": tone,
            "timestamp": Utc::now(),
        },
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeEmailRequest {
    #[serde(default)]
    email_content: String,
    email_id: Option<String>,
}

async fn analyze_email(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<AnalyzeEmailRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let llm = state
        .llm
        .as_ref()
        .ok_or_else(|| ApiError::Upstream("LLM API is not configured".to_string()))?;

    if request.email_content.is_empty() || request.email_content.chars().count() > 10000 {
        return Err(ApiError::Validation(vec![ValidationIssue::new(
            "emailContent",
            "Email content is required and cannot exceed 10000 characters",
        )]));
    }

    let (analysis, tokens_used) = llm.analyze(&request.email_content).await?;

    // Annotation is independent of the email lifecycle; persisting it is
    // optional and owner-scoped.
    if let Some(email_id) = request.email_id.as_deref() {
        if !state.db.set_analysis(&user.id, email_id, &analysis).await? {
            return Err(ApiError::NotFound("Email not found"));
        }
    }

    Ok(Json(json!({
        "success": true,
        "analysis": analysis,
        "metadata": {
            "model": llm.model(),
            "tokensUsed": tokens_used,
            "timestamp": Utc::now(),
        },
    })))
}
