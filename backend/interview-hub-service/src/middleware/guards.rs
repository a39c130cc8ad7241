//! Participant identity extraction.
//!
//! Tokens are verified by the identity layer in front of the hub, which
//! forwards the participant id. The hub trusts it as given.

use actix_web::{dev::Payload, web, Error, FromRequest, HttpRequest};
use serde::Deserialize;
use std::future::{ready, Ready};
use uuid::Uuid;

use crate::error::AppError;

pub const USER_ID_HEADER: &str = "X-User-Id";

/// The participant making the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
}

#[derive(Deserialize)]
struct UserQuery {
    user_id: Uuid,
}

fn user_id_from(req: &HttpRequest) -> Option<Uuid> {
    if let Some(value) = req.headers().get(USER_ID_HEADER) {
        return value.to_str().ok().and_then(|v| Uuid::parse_str(v.trim()).ok());
    }
    // Browsers cannot set headers on a WebSocket upgrade.
    web::Query::<UserQuery>::from_query(req.query_string())
        .ok()
        .map(|q| q.user_id)
}

impl FromRequest for User {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(
            user_id_from(req)
                .map(|id| User { id })
                .ok_or_else(|| AppError::Unauthorized.into()),
        )
    }
}
