//! Session endpoints
//!
//! Creation, lookup and lifecycle transitions. Every transition is announced
//! to the session's events topic and to both participants' private queues.

use actix_web::{get, post, web, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::guards::User;
use crate::models::NewSession;
use crate::state::AppState;

/// Lifecycle action named in the request path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionAction {
    Start,
    Pause,
    Resume,
    End,
    Cancel,
    Expire,
}

/// Create a session in SCHEDULED status
///
/// **Endpoint**: `POST /api/v1/sessions`
#[post("/api/v1/sessions")]
pub async fn create_session(
    state: web::Data<AppState>,
    user: User,
    request: web::Json<NewSession>,
) -> Result<HttpResponse, AppError> {
    let session = state
        .lifecycle
        .create_session(request.into_inner(), Some(user.id))
        .await?;
    Ok(HttpResponse::Created().json(session))
}

/// **Endpoint**: `GET /api/v1/sessions/:id`
#[get("/api/v1/sessions/{session_id}")]
pub async fn get_session(
    state: web::Data<AppState>,
    session_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let session = state.lifecycle.get_session(session_id.into_inner()).await?;
    Ok(HttpResponse::Ok().json(session))
}

/// Apply a lifecycle transition
///
/// Unknown actions do not match the route and yield 404.
///
/// **Endpoint**: `POST /api/v1/sessions/:id/{start|pause|resume|end|cancel|expire}`
#[post("/api/v1/sessions/{session_id}/{action}")]
pub async fn transition_session(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<(Uuid, SessionAction)>,
) -> Result<HttpResponse, AppError> {
    let (session_id, action) = path.into_inner();
    let by = Some(user.id);
    let lifecycle = &state.lifecycle;

    let session = match action {
        SessionAction::Start => lifecycle.start(session_id, by).await?,
        SessionAction::Pause => lifecycle.pause(session_id, by).await?,
        SessionAction::Resume => lifecycle.resume(session_id, by).await?,
        SessionAction::End => lifecycle.end(session_id, by).await?,
        SessionAction::Cancel => lifecycle.cancel(session_id, by).await?,
        SessionAction::Expire => lifecycle.expire(session_id, by).await?,
    };
    Ok(HttpResponse::Ok().json(session))
}
