pub mod interactions;
pub mod sessions;
pub mod wsroute;

use actix_web::{web, HttpResponse};

async fn health() -> HttpResponse {
    HttpResponse::Ok().body("OK")
}

/// Register every hub endpoint.
pub fn configure(cfg: &mut web::ServiceConfig) {
    // Interaction routes first: `/sessions/{id}/interactions` would otherwise
    // be taken by the `/sessions/{id}/{action}` pattern.
    cfg.service(interactions::submit_interaction)
        .service(interactions::get_interactions)
        .service(interactions::delete_interaction)
        .service(sessions::create_session)
        .service(sessions::get_session)
        .service(sessions::transition_session)
        .service(wsroute::ws_handler)
        .route("/health", web::get().to(health));
}
