use actix_web::{delete, get, post, web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::guards::User;
use crate::models::{NewInteraction, TimeRange};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// Submit an interaction on behalf of the calling participant
///
/// **Endpoint**: `POST /api/v1/sessions/:id/interactions`
#[post("/api/v1/sessions/{session_id}/interactions")]
pub async fn submit_interaction(
    state: web::Data<AppState>,
    user: User,
    session_id: web::Path<Uuid>,
    request: web::Json<NewInteraction>,
) -> Result<HttpResponse, AppError> {
    let interaction = state
        .router
        .submit_from_client(session_id.into_inner(), user.id, request.into_inner())
        .await?;
    Ok(HttpResponse::Created().json(interaction))
}

/// Session history, oldest first, optionally limited to an inclusive window
///
/// **Endpoint**: `GET /api/v1/sessions/:id/interactions?start=&end=`
#[get("/api/v1/sessions/{session_id}/interactions")]
pub async fn get_interactions(
    state: web::Data<AppState>,
    session_id: web::Path<Uuid>,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse, AppError> {
    let HistoryQuery { start, end } = query.into_inner();
    let interactions = state
        .router
        .get_session_interactions(session_id.into_inner(), TimeRange { start, end })
        .await?;
    Ok(HttpResponse::Ok().json(interactions))
}

/// Only the author may delete an interaction
///
/// **Endpoint**: `DELETE /api/v1/interactions/:id`
#[delete("/api/v1/interactions/{interaction_id}")]
pub async fn delete_interaction(
    state: web::Data<AppState>,
    user: User,
    interaction_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    state
        .router
        .delete_interaction(interaction_id.into_inner(), user.id)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}
