use actix_web::{web, App, HttpServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use x402_facilitator::bootstrap::{bootstrap, ServerConfig};
use x402_facilitator::routes;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("invalid configuration: {e}");
            std::process::exit(1);
        }
    };
    let port = config.port;

    let state = match bootstrap(config).await {
        Ok(state) => web::Data::new(state),
        Err(e) => {
            tracing::error!("facilitator failed to start: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!("x402 facilitator listening on port {port}");
    tracing::info!("Facilitator address: {}", state.facilitator_address);
    for network in state.facilitator.networks() {
        tracing::info!("  network: {network} (chain {})", network.chain_id());
    }
    tracing::info!("  GET  http://localhost:{port}/supported");
    tracing::info!("  POST http://localhost:{port}/verify");
    tracing::info!("  POST http://localhost:{port}/settle");

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .app_data(web::PayloadConfig::new(65_536))
            .service(routes::health)
            .service(routes::metrics_endpoint)
            .service(routes::supported)
            .service(routes::verify)
            .service(routes::settle)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
