use actix_web::{web, App, HttpServer};
use interview_hub_service::{config, error, logging, routes, state::AppState};

#[actix_web::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = config::Config::from_env()?;
    let bind_addr = cfg.bind_addr();

    // In-memory stores; durable backends plug in through the store traits.
    let state = AppState::in_memory(cfg);

    tracing::info!(
        %bind_addr,
        inbox_capacity = state.config.inbox_capacity,
        "starting interview-hub-service"
    );

    HttpServer::new(move || {
        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .app_data(web::Data::new(state.clone()))
            .configure(routes::configure)
    })
    .bind(&bind_addr)
    .map_err(|e| error::AppError::StartServer(format!("bind REST: {e}")))?
    .run()
    .await
    .map_err(|e| error::AppError::StartServer(format!("REST server: {e}")))
}
