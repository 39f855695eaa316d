//! Mapping of pipeline failures to HTTP responses

use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use species_classifier::inference::PredictError;

/// Body returned for every failed request
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Message for requests arriving before a model is loaded
pub const MSG_MODEL_NOT_LOADED: &str = "Modelo no cargado";

/// Message for any failure while storing, decoding or scoring an image
pub const MSG_PROCESSING_FAILED: &str = "Error procesando la imagen";

/// Error returned by API handlers
#[derive(Debug)]
pub enum ApiError {
    Predict(PredictError),
    Multipart(MultipartError),
}

impl From<PredictError> for ApiError {
    fn from(err: PredictError) -> Self {
        Self::Predict(err)
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        Self::Multipart(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Predict(PredictError::Validation(message)) => {
                (StatusCode::BAD_REQUEST, message)
            }
            ApiError::Predict(PredictError::ModelUnavailable) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                MSG_MODEL_NOT_LOADED.to_string(),
            ),
            // details were logged where the failure happened
            ApiError::Predict(PredictError::InferenceFailure(_)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                MSG_PROCESSING_FAILED.to_string(),
            ),
            ApiError::Multipart(err) => (err.status(), err.body_text()),
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}
