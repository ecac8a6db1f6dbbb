//! # API REST
//!
//! REST API for the EMTCT reconciliation engine.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (JSON serialization, CORS, status mapping)
//!
//! Engine calls block on SQLite, so every handler runs them on the blocking pool.

#![warn(rust_2018_idioms)]

pub mod wire;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use emtct_core::{EmtctError, EmtctResult, Engine};
use emtct_types::{NonEmptyText, PatientId};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;
use wire::*;

/// Application state shared across REST API handlers.
#[derive(Clone)]
pub struct AppState {
    engine: Arc<Engine>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        patient_labs,
        infant_syphilis_screenings,
        infant_hiv_screenings,
        create_hiv_screening,
        amend_hiv_screening,
        sync_pregnancies,
        sync_patients,
        missing_pcrs,
    ),
    components(schemas(
        HealthRes,
        LabResultRes,
        LabsRes,
        TimelinessRes,
        SyphilisScreeningRes,
        SyphilisScreeningsRes,
        HivScreeningFields,
        CreateHivScreeningReq,
        AmendHivScreeningReq,
        HivScreeningRes,
        HivScreeningsRes,
        SyncPregnanciesReq,
        PregnancyRes,
        SyncPregnanciesRes,
        SyncPatientsReq,
        PatientRes,
        SyncPatientsRes,
        MissingPcrRes,
        MissingPcrsRes,
    ))
)]
pub struct ApiDoc;

/// Build the REST router with Swagger UI mounted at `/swagger-ui`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/patients/:patient_id/labs", get(patient_labs))
        .route(
            "/infants/:infant_id/syphilis-screenings",
            get(infant_syphilis_screenings),
        )
        .route(
            "/infants/:infant_id/hiv-screenings",
            get(infant_hiv_screenings).post(create_hiv_screening),
        )
        .route("/hiv-screenings/:id", put(amend_hiv_screening))
        .route("/etl/pregnancies", post(sync_pregnancies))
        .route("/etl/patients", post(sync_patients))
        .route("/reports/missing-pcrs", get(missing_pcrs))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

type ApiError = (StatusCode, &'static str);

fn error_response(operation: &'static str, err: EmtctError) -> ApiError {
    tracing::error!("{operation} error: {err:?}");
    match err {
        EmtctError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "Invalid input"),
        EmtctError::NotFound { .. } => (StatusCode::NOT_FOUND, "Not found"),
        EmtctError::Cancelled { .. } | EmtctError::DeadlineExceeded { .. } => {
            (StatusCode::GATEWAY_TIMEOUT, "Request timed out")
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "Internal error"),
    }
}

/// Run an engine call on the blocking pool and map its failure to a status.
async fn blocking<T, F>(operation: &'static str, f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> EmtctResult<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(error_response(operation, e)),
        Err(e) => {
            tracing::error!("{operation} task failed: {e}");
            Err((StatusCode::INTERNAL_SERVER_ERROR, "Internal error"))
        }
    }
}

fn user_name(raw: &str) -> Result<NonEmptyText, ApiError> {
    NonEmptyText::new(raw).map_err(|_| (StatusCode::BAD_REQUEST, "user is required"))
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint used by monitoring and load balancers.
async fn health() -> Json<HealthRes> {
    Json(HealthRes {
        ok: true,
        message: "EMTCT REST API is alive".into(),
    })
}

#[utoipa::path(
    get,
    path = "/patients/{patient_id}/labs",
    params(("patient_id" = i64, Path, description = "Mother's patient id")),
    responses(
        (status = 200, description = "Lab results for the latest registry pregnancy", body = LabsRes),
        (status = 504, description = "Lookup timed out"),
        (status = 500, description = "Internal server error")
    )
)]
/// Reconciled lab results for the patient's most recent pregnancy in the registry.
///
/// Empty when the patient has no registry pregnancy.
async fn patient_labs(
    State(state): State<AppState>,
    Path(patient_id): Path<i64>,
) -> Result<Json<LabsRes>, ApiError> {
    let engine = state.engine.clone();
    let labs = blocking("Patient labs", move || {
        let ctx = engine.call_context();
        engine.pregnancy_labs(&ctx, PatientId::new(patient_id))
    })
    .await?;
    Ok(Json(LabsRes {
        labs: labs.into_iter().map(Into::into).collect(),
    }))
}

#[utoipa::path(
    get,
    path = "/infants/{infant_id}/syphilis-screenings",
    params(("infant_id" = i64, Path, description = "Infant's patient id")),
    responses(
        (status = 200, description = "Syphilis screenings in the first two years", body = SyphilisScreeningsRes),
        (status = 500, description = "Internal server error")
    )
)]
async fn infant_syphilis_screenings(
    State(state): State<AppState>,
    Path(infant_id): Path<i64>,
) -> Result<Json<SyphilisScreeningsRes>, ApiError> {
    let engine = state.engine.clone();
    let screenings = blocking("Syphilis screenings", move || {
        let ctx = engine.call_context();
        engine.syphilis_screenings(&ctx, PatientId::new(infant_id))
    })
    .await?;
    Ok(Json(SyphilisScreeningsRes {
        screenings: screenings.into_iter().map(Into::into).collect(),
    }))
}

#[utoipa::path(
    get,
    path = "/infants/{infant_id}/hiv-screenings",
    params(("infant_id" = i64, Path, description = "Infant's patient id")),
    responses(
        (status = 200, description = "HIV screenings recorded for the infant", body = HivScreeningsRes),
        (status = 500, description = "Internal server error")
    )
)]
async fn infant_hiv_screenings(
    State(state): State<AppState>,
    Path(infant_id): Path<i64>,
) -> Result<Json<HivScreeningsRes>, ApiError> {
    let engine = state.engine.clone();
    let screenings = blocking("HIV screenings", move || {
        let ctx = engine.call_context();
        engine
            .screenings()
            .hiv_screenings(&ctx, PatientId::new(infant_id))
    })
    .await?;
    Ok(Json(HivScreeningsRes {
        screenings: screenings.into_iter().map(Into::into).collect(),
    }))
}

#[utoipa::path(
    post,
    path = "/infants/{infant_id}/hiv-screenings",
    params(("infant_id" = i64, Path, description = "Infant's patient id")),
    request_body = CreateHivScreeningReq,
    responses(
        (status = 201, description = "HIV screening created", body = HivScreeningRes),
        (status = 400, description = "Bad request"),
        (status = 404, description = "Infant birth date not found"),
        (status = 500, description = "Internal server error")
    )
)]
/// Record an HIV screening. The due date and timeliness are derived from the infant's
/// birth date.
async fn create_hiv_screening(
    State(state): State<AppState>,
    Path(infant_id): Path<i64>,
    Json(req): Json<CreateHivScreeningReq>,
) -> Result<(StatusCode, Json<HivScreeningRes>), ApiError> {
    let user = user_name(&req.user)?;
    let engine = state.engine.clone();
    let created = blocking("Create HIV screening", move || {
        let ctx = engine.call_context();
        engine.screenings().create_hiv_screening(
            &ctx,
            PatientId::new(infant_id),
            PatientId::new(req.mother_id),
            req.screening.into(),
            &user,
        )
    })
    .await?;
    Ok((StatusCode::CREATED, Json(created.into())))
}

#[utoipa::path(
    put,
    path = "/hiv-screenings/{id}",
    params(("id" = String, Path, description = "Screening id (UUID)")),
    request_body = AmendHivScreeningReq,
    responses(
        (status = 200, description = "HIV screening amended", body = HivScreeningRes),
        (status = 400, description = "Bad request"),
        (status = 404, description = "Screening not found"),
        (status = 500, description = "Internal server error")
    )
)]
/// Amend an HIV screening. Timeliness is recomputed; the due date is kept.
async fn amend_hiv_screening(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AmendHivScreeningReq>,
) -> Result<Json<HivScreeningRes>, ApiError> {
    let id = Uuid::parse_str(&id).map_err(|_| (StatusCode::BAD_REQUEST, "invalid screening id"))?;
    let user = user_name(&req.user)?;
    let engine = state.engine.clone();
    let amended = blocking("Amend HIV screening", move || {
        let ctx = engine.call_context();
        engine
            .screenings()
            .amend_hiv_screening(&ctx, id, req.screening.into(), &user)
    })
    .await?;
    Ok(Json(amended.into()))
}

#[utoipa::path(
    post,
    path = "/etl/pregnancies",
    request_body = SyncPregnanciesReq,
    responses(
        (status = 200, description = "Pregnancies inserted into the registry", body = SyncPregnanciesRes),
        (status = 400, description = "Year out of range"),
        (status = 500, description = "Internal server error")
    )
)]
/// Copy the year's pregnancies missing from the registry out of the source of record.
async fn sync_pregnancies(
    State(state): State<AppState>,
    Json(req): Json<SyncPregnanciesReq>,
) -> Result<Json<SyncPregnanciesRes>, ApiError> {
    let year = req.year;
    let engine = state.engine.clone();
    let inserted = blocking("Sync pregnancies", move || {
        let ctx = engine.call_context();
        engine.sync_year(&ctx, year)
    })
    .await?;
    Ok(Json(SyncPregnanciesRes {
        year,
        inserted: inserted.into_iter().map(Into::into).collect(),
    }))
}

#[utoipa::path(
    post,
    path = "/etl/patients",
    request_body = SyncPatientsReq,
    responses(
        (status = 200, description = "Patients inserted into the registry", body = SyncPatientsRes),
        (status = 400, description = "Year predates the source of record"),
        (status = 500, description = "Internal server error")
    )
)]
/// Copy the year's EMTCT patients missing from the registry out of the source of record.
async fn sync_patients(
    State(state): State<AppState>,
    Json(req): Json<SyncPatientsReq>,
) -> Result<Json<SyncPatientsRes>, ApiError> {
    let year = req.year;
    let engine = state.engine.clone();
    let inserted = blocking("Sync patients", move || {
        let ctx = engine.call_context();
        engine.sync_patients(&ctx, year)
    })
    .await?;
    Ok(Json(SyncPatientsRes {
        year,
        total: inserted.len(),
        inserted: inserted.into_iter().map(Into::into).collect(),
    }))
}

#[utoipa::path(
    get,
    path = "/reports/missing-pcrs",
    params(MissingPcrsQuery),
    responses(
        (status = 200, description = "Unsampled HIV screenings due in the year, by infant", body = MissingPcrsRes),
        (status = 400, description = "Bad request"),
        (status = 500, description = "Internal server error")
    )
)]
async fn missing_pcrs(
    State(state): State<AppState>,
    Query(query): Query<MissingPcrsQuery>,
) -> Result<Json<MissingPcrsRes>, ApiError> {
    let year = query.year;
    let engine = state.engine.clone();
    let infants = blocking("Missing PCRs", move || {
        let ctx = engine.call_context();
        engine.screenings().missing_pcrs(&ctx, year)
    })
    .await?;
    Ok(Json(MissingPcrsRes {
        year,
        infants: infants.into_iter().map(Into::into).collect(),
    }))
}
