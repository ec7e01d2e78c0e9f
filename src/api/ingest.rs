use crate::api::AppState;
use crate::error::AppError;
use crate::ingest::CycleReport;
use crate::venue::CyclePayload;
use axum::extract::State;
use axum::Json;

/// Ingestion entrypoint: accepts a venue-tagged or normalized cycle
/// payload and returns the structured cycle report, anomalies included.
pub async fn ingest_cycle(
    State(state): State<AppState>,
    Json(payload): Json<CyclePayload>,
) -> Result<Json<CycleReport>, AppError> {
    let cycle = payload
        .normalize()
        .map_err(|e| AppError::BadRequest(format!("Invalid venue payload: {}", e)))?;

    let report = state.ingestor.ingest(cycle).await?;
    Ok(Json(report))
}
