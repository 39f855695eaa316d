use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::Value;
use tower::ServiceExt;

use species_classifier::model::{Classifier, ClassifierOutput, ImageTensor, SpeciesRegistry};
use species_server::{build_router, AppState, ServerConfig};

const BOUNDARY: &str = "species-test-boundary";

struct CountingClassifier {
    probabilities: Vec<f32>,
    calls: AtomicUsize,
}

impl Classifier for CountingClassifier {
    fn num_classes(&self) -> usize {
        self.probabilities.len()
    }

    fn score(&self, _input: &ImageTensor) -> species_classifier::Result<ClassifierOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ClassifierOutput::single("probabilities", self.probabilities.clone()))
    }
}

struct TestApp {
    router: Router,
    classifier: Arc<CountingClassifier>,
    temp_dir: tempfile::TempDir,
}

impl TestApp {
    fn new(model_loaded: bool) -> Self {
        let temp_dir = tempfile::tempdir().unwrap();
        let classifier = Arc::new(CountingClassifier {
            probabilities: vec![0.05, 0.15, 0.7, 0.1],
            calls: AtomicUsize::new(0),
        });
        let registry = SpeciesRegistry::from_names([
            "Anas_andium",
            "Espeletia_grandiflora",
            "Puma_concolor",
            "Tremarctos_ornatus",
        ])
        .unwrap();

        let config = ServerConfig {
            temp_dir: temp_dir.path().join("uploads"),
            ..ServerConfig::default()
        };
        let loaded: Option<Arc<dyn Classifier>> = if model_loaded {
            Some(classifier.clone())
        } else {
            None
        };
        let state = AppState::with_parts(config, loaded, registry);

        Self {
            router: build_router(Arc::new(state)),
            classifier,
            temp_dir,
        }
    }

    fn calls(&self) -> usize {
        self.classifier.calls.load(Ordering::SeqCst)
    }

    fn uploads_empty(&self) -> bool {
        let dir = self.temp_dir.path().join("uploads");
        !dir.exists() || std::fs::read_dir(dir).unwrap().next().is_none()
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }
}

fn png_bytes() -> Vec<u8> {
    let mut buf = std::io::Cursor::new(Vec::new());
    image::RgbImage::from_pixel(32, 24, image::Rgb([90, 160, 60]))
        .write_to(&mut buf, image::ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

fn multipart_request(field: &str, file_name: Option<&str>, bytes: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    let disposition = match file_name {
        Some(name) => format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field, name
        ),
        None => format!("Content-Disposition: form-data; name=\"{}\"\r\n", field),
    };
    body.extend_from_slice(disposition.as_bytes());
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri("/predict")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn status_reports_loaded_model() {
    let app = TestApp::new(true);
    let (status, body) = app.send(get("/")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["especies_disponibles"], 4);
    assert_eq!(body["modelo_cargado"], true);
}

#[tokio::test]
async fn status_reports_degraded_mode() {
    let app = TestApp::new(false);
    let (status, body) = app.send(get("/")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "model not loaded");
    assert_eq!(body["modelo_cargado"], false);
}

#[tokio::test]
async fn test_endpoint_responds() {
    let app = TestApp::new(false);
    let (status, body) = app.send(get("/test")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert!(body["uptime_seconds"].is_u64());
}

#[tokio::test]
async fn predict_returns_argmax() {
    let app = TestApp::new(true);
    let (status, body) = app
        .send(multipart_request("file", Some("oso.png"), &png_bytes()))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["indice"], 2);
    assert_eq!(body["especie"], "Puma_concolor");
    assert_eq!(body["probabilidades"].as_array().unwrap().len(), 4);
    assert_eq!(app.calls(), 1);
    assert!(app.uploads_empty());
}

#[tokio::test]
async fn predict_without_file_field_is_rejected() {
    let app = TestApp::new(true);
    let (status, body) = app
        .send(multipart_request("image", Some("oso.png"), &png_bytes()))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No file part");
    assert_eq!(app.calls(), 0);
    assert!(app.uploads_empty());
}

#[tokio::test]
async fn predict_without_multipart_body_is_rejected() {
    let app = TestApp::new(true);
    let request = Request::builder()
        .method("POST")
        .uri("/predict")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let (status, body) = app.send(request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No file part");
    assert_eq!(app.calls(), 0);
}

#[tokio::test]
async fn predict_with_plain_form_value_is_missing_file() {
    let app = TestApp::new(true);
    let (status, body) = app.send(multipart_request("file", None, b"hello")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No file part");
    assert_eq!(app.calls(), 0);
    assert!(app.uploads_empty());
}

#[tokio::test]
async fn predict_with_empty_filename_is_rejected() {
    let app = TestApp::new(true);
    let (status, body) = app
        .send(multipart_request("file", Some(""), &png_bytes()))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No selected file");
    assert_eq!(app.calls(), 0);
}

#[tokio::test]
async fn predict_without_model_is_server_error() {
    let app = TestApp::new(false);
    let (status, body) = app
        .send(multipart_request("file", Some("oso.png"), &png_bytes()))
        .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Modelo no cargado");
    assert!(app.uploads_empty());
}

#[tokio::test]
async fn predict_with_undecodable_image_hides_details() {
    let app = TestApp::new(true);
    let (status, body) = app
        .send(multipart_request("file", Some("oso.jpg"), b"not really a jpeg"))
        .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Error procesando la imagen");
    assert_eq!(app.calls(), 0);
    assert!(app.uploads_empty());
}

#[tokio::test]
async fn repeated_predictions_leave_no_temp_files() {
    let app = TestApp::new(true);
    for _ in 0..3 {
        let (status, _) = app
            .send(multipart_request("file", Some("oso.png"), &png_bytes()))
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    assert_eq!(app.calls(), 3);
    assert!(app.uploads_empty());
    assert!(Path::new(&app.temp_dir.path().join("uploads")).exists());
}
