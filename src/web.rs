//
// web.rs
// dicom-deid
//
// Axum-based HTTP server exposing upload, anonymization, decryption, and key download APIs.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fmt::Display;
use std::net::SocketAddr;
use std::path::Path as FsPath;

use axum::{
    body::Bytes,
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use dicom::object::open_file;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use crate::{
    anonymize::{Anonymizer, Method},
    error::DeidError,
    keystore::{KeyMaterial, KeyStore},
    models::PatientFields,
    recover,
    storage::FileStore,
};

#[derive(Clone)]
struct AppState {
    store: FileStore,
    keys: KeyStore,
    key: KeyMaterial,
    engine: Anonymizer,
}

type ApiResult<T> = Result<T, (StatusCode, String)>;

pub async fn start_server(
    host: &str,
    port: u16,
    uploads: &FsPath,
    keys: KeyStore,
    engine: Anonymizer,
) -> anyhow::Result<()> {
    let key = keys.load_or_create()?;
    let state = AppState {
        store: FileStore::new(uploads)?,
        keys,
        key,
        engine,
    };

    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    tracing::info!(%addr, "server listening");
    println!("Server running at http://{}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/upload", post(upload_handler))
        .route("/api/anonymize/:filename", post(anonymize_handler))
        .route("/api/decrypt", post(decrypt_handler))
        .route("/api/key", get(key_handler))
        .route("/api/download/:filename", get(download_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

struct Upload {
    name: Option<String>,
    data: Bytes,
}

/// Drains the multipart body, keeping the parts named in `wanted`.
async fn read_parts(mut multipart: Multipart, wanted: &[&str]) -> ApiResult<Vec<(String, Upload)>> {
    let mut parts = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(bad_request)? {
        let Some(part) = field.name().filter(|n| wanted.contains(n)).map(str::to_string) else {
            continue;
        };
        let name = field.file_name().map(|s| s.to_string());
        let data = field.bytes().await.map_err(bad_request)?;
        parts.push((part, Upload { name, data }));
    }
    Ok(parts)
}

fn take_part(parts: &mut Vec<(String, Upload)>, wanted: &str) -> ApiResult<Upload> {
    let idx = parts
        .iter()
        .position(|(name, _)| name == wanted)
        .ok_or((StatusCode::BAD_REQUEST, format!("Missing `{}` part", wanted)))?;
    Ok(parts.swap_remove(idx).1)
}

async fn upload_handler(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Json<Value>> {
    let mut parts = read_parts(multipart, &["file"]).await?;
    let upload = take_part(&mut parts, "file")?;

    let stored = state
        .store
        .save(upload.name.as_deref(), &upload.data)
        .map_err(internal_error)?;
    let obj = open_file(&stored.path).map_err(bad_request)?;

    Ok(Json(json!({
        "success": true,
        "filename": stored.name,
        "patient": PatientFields::from_record(&obj),
    })))
}

#[derive(Debug, Deserialize)]
struct AnonymizeQuery {
    method: String,
}

async fn anonymize_handler(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    Query(query): Query<AnonymizeQuery>,
) -> ApiResult<Json<Value>> {
    let method: Method = query.method.parse().map_err(deid_error)?;
    let path = state.store.resolve(&filename).map_err(not_found)?;
    let output = state.store.derived(&filename, method);

    let mut obj = open_file(&path).map_err(bad_request)?;
    state
        .engine
        .anonymize(&mut obj, method, &state.key)
        .map_err(deid_error)?;
    obj.write_to_file(&output.path).map_err(internal_error)?;

    Ok(Json(json!({
        "success": true,
        "method": method,
        "filename": output.name,
        "patient": PatientFields::from_record(&obj),
    })))
}

/// Works on the upload in isolation; nothing is written to the shared store.
async fn decrypt_handler(multipart: Multipart) -> ApiResult<Json<Value>> {
    let mut parts = read_parts(multipart, &["file", "key"]).await?;
    let file = take_part(&mut parts, "file")?;
    let key = KeyMaterial::from_bytes(take_part(&mut parts, "key")?.data.to_vec());

    let (patient, report) = recover::recover_bytes(&file.data, &key).map_err(|err| {
        tracing::error!(error = %format!("{:#}", err), "decrypt request failed");
        bad_request(format!("{:#}", err))
    })?;

    Ok(Json(json!({
        "success": true,
        "patient": patient,
        "report": report,
    })))
}

async fn key_handler(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let bytes = tokio::fs::read(state.keys.path())
        .await
        .map_err(internal_error)?;
    Ok(attachment("application/octet-stream", "secret.key", bytes))
}

async fn download_handler(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let path = state.store.resolve(&filename).map_err(not_found)?;
    let bytes = tokio::fs::read(&path).await.map_err(internal_error)?;
    Ok(attachment("application/dicom", &filename, bytes))
}

fn attachment(content_type: &'static str, filename: &str, bytes: Vec<u8>) -> impl IntoResponse {
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", filename))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
    (
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(content_type)),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
}

fn deid_error(err: DeidError) -> (StatusCode, String) {
    if err.is_client_error() {
        bad_request(err)
    } else {
        internal_error(err)
    }
}

fn bad_request<E: Display>(err: E) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, err.to_string())
}

fn internal_error<E: Display>(err: E) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

fn not_found<E: Display>(err: E) -> (StatusCode, String) {
    (StatusCode::NOT_FOUND, err.to_string())
}
