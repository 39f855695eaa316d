//! Prediction endpoint

use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    Json,
};
use serde::Serialize;
use tracing::{debug, error, info};

use species_classifier::inference::{PredictError, UploadedFile};
use species_classifier::SpeciesError;

use crate::error::ApiError;
use crate::state::SharedState;

/// Name of the multipart field carrying the image
pub const FILE_FIELD: &str = "file";

#[derive(Serialize)]
pub struct PredictResponse {
    pub indice: usize,
    pub especie: String,
    pub probabilidades: Vec<f32>,
}

/// Pull the `file` upload out of a multipart body, skipping other fields
///
/// A part named `file` without a `filename` parameter is a plain form value,
/// not an upload.
async fn read_file_field(multipart: &mut Multipart) -> Result<Option<UploadedFile>, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let Some(file_name) = field.file_name().map(str::to_string) else {
            debug!("Ignoring form value named '{}'", FILE_FIELD);
            continue;
        };

        let bytes = field.bytes().await?;
        return Ok(Some(UploadedFile {
            file_name: Some(file_name),
            bytes: bytes.to_vec(),
        }));
    }

    Ok(None)
}

/// POST /predict - Classify an uploaded image
pub async fn predict(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictResponse>, ApiError> {
    let upload = match multipart {
        Ok(mut multipart) => read_file_field(&mut multipart).await?,
        Err(rejection) => {
            debug!("Request is not multipart: {}", rejection);
            None
        }
    };

    if let Some(file) = &upload {
        info!(
            "Prediction request for {:?} ({} bytes)",
            file.file_name,
            file.bytes.len()
        );
    }

    // decoding and inference are CPU bound
    let predictor = state.predictor.clone();
    let prediction = tokio::task::spawn_blocking(move || predictor.predict_upload(upload))
        .await
        .map_err(|e| {
            error!("Prediction task failed: {}", e);
            PredictError::InferenceFailure(SpeciesError::Inference(e.to_string()))
        })??;

    info!(
        "Predicted {} (index {}, {:.2}%)",
        prediction.species_name,
        prediction.predicted_index,
        prediction.confidence * 100.0
    );

    Ok(Json(PredictResponse {
        indice: prediction.predicted_index,
        especie: prediction.species_name,
        probabilidades: prediction.probabilities,
    }))
}
