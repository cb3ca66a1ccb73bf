use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use retina_backend::config::Settings;
use retina_backend::inference::load_predictor;
use retina_backend::logging;
use retina_backend::routes::{configure_routes, AppState};
use retina_backend::training::default_runner;
use std::env;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let settings = Settings::from_env().context("Invalid service configuration")?;
    logging::init(&settings.log_file)
        .with_context(|| format!("Failed to open log file {}", settings.log_file.display()))?;

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    }
    log::info!("API URL: {}", settings.api_url);

    let preprocess = settings.preprocess_config();
    let predictor = load_predictor(&settings.model_path, preprocess.image_size);
    let trainer = default_runner(settings.training_config()?);

    let state = AppState::new(settings.clone(), predictor, trainer);
    let bind_address = settings.bind_address();
    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::AUTHORIZATION,
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(web::Data::new(state.clone()))
            .configure(configure_routes)
    })
    .bind(&bind_address)
    .with_context(|| format!("Failed to bind {}", bind_address))?
    .run()
    .await?;

    log::info!("Application shutting down...");
    Ok(())
}
