use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use actix_multipart::{Field, Multipart};
use actix_web::{guard, mime, web, HttpResponse};
use futures::TryStreamExt;
use log::{error, info};
use serde::Deserialize;
use serde_json::json;
use shared::{
    BatchPredictionResponse, HealthResponse, ModelInfo, PredictResponse, TrainResponse,
};

use crate::cache::PredictionCache;
use crate::config::Settings;
use crate::error::ApiError;
use crate::inference::{model_file_date, Classifier, Predictor, PredictorKind};
use crate::preprocess::Preprocessor;
use crate::training::TrainingRunner;

const NOT_AN_IMAGE: &str = "File must be an image (JPEG, PNG)";

/// Shared handler state; cheap to clone into each worker.
#[derive(Clone)]
pub struct AppState {
    pub classifier: Classifier,
    pub trainer: Option<Arc<dyn TrainingRunner>>,
    pub settings: Settings,
}

impl AppState {
    pub fn new(
        settings: Settings,
        predictor: Arc<dyn Predictor>,
        trainer: Option<Arc<dyn TrainingRunner>>,
    ) -> Self {
        let classifier = Classifier::new(
            predictor,
            Preprocessor::new(settings.preprocess_config()),
            PredictionCache::new(settings.cache_capacity),
        );
        Self {
            classifier,
            trainer,
            settings,
        }
    }
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/{tail:.*}").guard(guard::Options()).to(preflight))
        .service(web::resource("/").route(web::get().to(root)))
        .service(web::resource("/health").route(web::get().to(health)))
        .service(web::resource("/model/info").route(web::get().to(model_info)))
        .service(web::resource("/predict").route(web::post().to(predict)))
        .service(web::resource("/batch_predict").route(web::post().to(batch_predict)))
        .service(web::resource("/train").route(web::post().to(train)));
}

async fn preflight() -> HttpResponse {
    HttpResponse::Ok().json(json!({}))
}

async fn root(state: web::Data<AppState>) -> HttpResponse {
    let model_status = match state.classifier.predictor().kind() {
        PredictorKind::Mock => "Using mock model",
        PredictorKind::Trained => "Using trained model",
    };
    HttpResponse::Ok().json(json!({
        "message": "Welcome to DR Detection API",
        "status": "active",
        "model_status": model_status,
        "endpoints": {
            "predict": "/predict - Analyze single image",
            "batch_predict": "/batch_predict - Analyze multiple images",
            "model_info": "/model/info - Model details",
            "train": "/train?data_dir=<path> - Train the model",
            "health": "/health - Check API health"
        }
    }))
}

async fn health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        model_loaded: state.classifier.predictor().kind() == PredictorKind::Trained,
        timestamp: chrono::Local::now().to_rfc3339(),
    })
}

async fn model_info(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let predictor = state.classifier.predictor();
    if predictor.kind() != PredictorKind::Trained {
        return Err(ApiError::ModelUnavailable);
    }

    Ok(HttpResponse::Ok().json(ModelInfo {
        model_loaded: true,
        input_shape: state.classifier.preprocessor().input_shape(),
        last_training_date: model_file_date(&state.settings.model_path),
        total_parameters: predictor.parameter_count().unwrap_or(0),
    }))
}

struct Upload {
    filename: String,
    bytes: Vec<u8>,
}

struct Rejected {
    filename: String,
    reason: String,
}

fn multipart_error(err: actix_multipart::MultipartError) -> ApiError {
    ApiError::BadRequest(format!("Invalid multipart payload: {}", err))
}

fn field_filename(field: &Field) -> Option<String> {
    field
        .content_disposition()
        .and_then(|cd| cd.get_filename())
        .map(str::to_string)
}

async fn drain(field: &mut Field) -> Result<(), ApiError> {
    while field.try_next().await.map_err(multipart_error)?.is_some() {}
    Ok(())
}

/// Reads one uploaded file. The outer error means the multipart stream itself
/// is broken; the inner one rejects just this file.
async fn read_upload(
    field: &mut Field,
    limit: usize,
) -> Result<Result<Upload, Rejected>, ApiError> {
    let filename = field_filename(field).unwrap_or_else(|| "unknown".to_string());

    let is_image = field.content_type().is_some_and(|m| m.type_() == mime::IMAGE);
    if !is_image {
        drain(field).await?;
        return Ok(Err(Rejected {
            filename,
            reason: NOT_AN_IMAGE.to_string(),
        }));
    }

    let mut bytes = Vec::new();
    while let Some(chunk) = field.try_next().await.map_err(multipart_error)? {
        if bytes.len() + chunk.len() > limit {
            drain(field).await?;
            return Ok(Err(Rejected {
                filename,
                reason: format!("File exceeds the {} byte upload limit", limit),
            }));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(Ok(Upload { filename, bytes }))
}

async fn predict(
    state: web::Data<AppState>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let limit = state.settings.max_upload_bytes;
    let mut upload = None;
    while let Some(mut field) = payload.try_next().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            drain(&mut field).await?;
            continue;
        }
        match read_upload(&mut field, limit).await? {
            Ok(file) => upload = Some(file),
            Err(rejected) => return Err(ApiError::BadRequest(rejected.reason)),
        }
        break;
    }

    let upload = upload.ok_or_else(|| ApiError::BadRequest("No file uploaded".to_string()))?;
    info!("Processing image: {}", upload.filename);

    let classifier = state.classifier.clone();
    let Upload { filename, bytes } = upload;
    let result = web::block(move || classifier.classify(&bytes)).await??;

    info!("Successfully processed image: {}", filename);
    Ok(HttpResponse::Ok().json(PredictResponse {
        success: true,
        data: result,
    }))
}

async fn batch_predict(
    state: web::Data<AppState>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let started = Instant::now();
    let limit = state.settings.max_upload_bytes;
    let max_files = state.settings.max_batch_files;
    let mut entries = Vec::new();

    while let Some(mut field) = payload.try_next().await.map_err(multipart_error)? {
        if field_filename(&field).is_none() {
            drain(&mut field).await?;
            continue;
        }
        if entries.len() == max_files {
            return Err(ApiError::BadRequest(format!(
                "Too many files, at most {} per request",
                max_files
            )));
        }
        entries.push(read_upload(&mut field, limit).await?);
    }

    if entries.is_empty() {
        return Err(ApiError::BadRequest("No files uploaded".to_string()));
    }

    let classifier = state.classifier.clone();
    let outcomes = web::block(move || {
        entries
            .into_iter()
            .map(|entry| match entry {
                Ok(upload) => {
                    let result = classifier
                        .classify_uncached(&upload.bytes)
                        .map_err(|e| e.to_string());
                    (upload.filename, result)
                }
                Err(rejected) => (rejected.filename, Err(rejected.reason)),
            })
            .collect::<Vec<_>>()
    })
    .await?;

    let mut predictions = Vec::new();
    let mut failed_images = Vec::new();
    for (filename, outcome) in outcomes {
        match outcome {
            Ok(result) => predictions.push(result),
            Err(reason) => {
                error!("Error processing {}: {}", filename, reason);
                failed_images.push(filename);
            }
        }
    }

    Ok(HttpResponse::Ok().json(BatchPredictionResponse {
        predictions,
        failed_images,
        total_processing_time: started.elapsed().as_secs_f64(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct TrainQuery {
    pub data_dir: Option<String>,
}

async fn train(
    state: web::Data<AppState>,
    query: web::Query<TrainQuery>,
) -> Result<HttpResponse, ApiError> {
    let Some(runner) = state.trainer.clone() else {
        return Ok(HttpResponse::Ok().json(TrainResponse {
            message: "Training initiated".to_string(),
            status: "success".to_string(),
            validation_accuracy: None,
            epochs_run: None,
            note: Some(
                "No training backend in this build; rebuild with the torch feature.".to_string(),
            ),
        }));
    };

    let data_dir = query
        .into_inner()
        .data_dir
        .filter(|dir| !dir.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing data_dir query parameter".to_string()))?;

    info!("Starting model training on {}", data_dir);
    let report = web::block(move || runner.run(Path::new(&data_dir)))
        .await?
        .map_err(|e| ApiError::Internal(format!("An error occurred during training: {}", e)))?;
    info!("Model training completed.");

    Ok(HttpResponse::Ok().json(TrainResponse {
        message: "Model training completed successfully.".to_string(),
        status: "success".to_string(),
        validation_accuracy: Some(report.best_val_accuracy),
        epochs_run: Some(report.epochs_run),
        note: None,
    }))
}
