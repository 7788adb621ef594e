//! `POST /api/settlements`, `GET /api/settlements/{id}`,
//! `GET /api/settlements`, `POST /api/recalculate` (spec.md §6).

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ApiError, Result};
use crate::models::{EffectiveStatus, GroupKey, Settlement};
use crate::store::SearchCriteria;
use crate::validation::SettlementRequest;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub status: &'static str,
    #[serde(rename = "sequenceId")]
    pub sequence_id: i64,
}

/// `POST /api/settlements`.
pub async fn ingest_settlement(
    State(state): State<AppState>,
    Json(request): Json<SettlementRequest>,
) -> Result<Json<IngestResponse>> {
    let result = state.ingestion.process_settlement(&request).await?;
    info!(
        settlement_id = %request.settlement_id,
        ref_id = result.ref_id,
        inserted = result.inserted,
        "settlement ingestion request handled"
    );
    Ok(Json(IngestResponse {
        status: "success",
        sequence_id: result.ref_id,
    }))
}

#[derive(Debug, Serialize)]
pub struct SettlementResponse {
    #[serde(flatten)]
    pub settlement: Settlement,
    #[serde(rename = "effectiveStatus")]
    pub effective_status: EffectiveStatus,
}

/// `GET /api/settlements/{id}`.
pub async fn get_settlement(
    State(state): State<AppState>,
    Path(settlement_id): Path<String>,
) -> Result<Json<SettlementResponse>> {
    let view = state
        .query
        .find_by_id(&settlement_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no settlement with id {settlement_id}")))?;

    Ok(Json(SettlementResponse {
        settlement: view.settlement,
        effective_status: view.status,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub pts: Option<String>,
    #[serde(rename = "processingEntity")]
    pub processing_entity: Option<String>,
    #[serde(rename = "counterpartyId")]
    pub counterparty_id: Option<String>,
    #[serde(rename = "valueDateFrom")]
    pub value_date_from: Option<String>,
    #[serde(rename = "valueDateTo")]
    pub value_date_to: Option<String>,
    pub direction: Option<String>,
    #[serde(rename = "businessStatus")]
    pub business_status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

const DEFAULT_PAGE_SIZE: i64 = 50;

/// `GET /api/settlements?...` search.
pub async fn search_settlements(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<SettlementResponse>>> {
    let criteria = SearchCriteria {
        pts: query.pts,
        processing_entity: query.processing_entity,
        counterparty_id: query.counterparty_id,
        value_date_from: query
            .value_date_from
            .as_deref()
            .map(parse_date)
            .transpose()?,
        value_date_to: query.value_date_to.as_deref().map(parse_date).transpose()?,
        direction: query.direction.map(|d| d.to_ascii_uppercase()),
        business_status: query.business_status.map(|s| s.to_ascii_uppercase()),
    };

    let views = state
        .query
        .search(&criteria, query.limit.unwrap_or(DEFAULT_PAGE_SIZE), query.offset.unwrap_or(0))
        .await?;

    Ok(Json(
        views
            .into_iter()
            .map(|v| SettlementResponse {
                settlement: v.settlement,
                effective_status: v.status,
            })
            .collect(),
    ))
}

fn parse_date(s: &str) -> Result<chrono::NaiveDate> {
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| ApiError::Validation(vec![format!("invalid date: {s}")]))
}

#[derive(Debug, Deserialize)]
pub struct GroupsQuery {
    pub pts: Option<String>,
    #[serde(rename = "processingEntity")]
    pub processing_entity: Option<String>,
}

/// Group enumeration, backing admin/export tooling.
pub async fn distinct_groups(
    State(state): State<AppState>,
    Query(query): Query<GroupsQuery>,
) -> Result<Json<Vec<GroupKey>>> {
    let criteria = SearchCriteria {
        pts: query.pts,
        processing_entity: query.processing_entity,
        ..Default::default()
    };
    Ok(Json(state.query.distinct_groups(&criteria).await?))
}

#[derive(Debug, Deserialize)]
pub struct RecalculateRequest {
    pub pts: String,
    #[serde(rename = "processingEntity")]
    pub processing_entity: String,
    #[serde(rename = "counterpartyId")]
    pub counterparty_id: String,
    #[serde(rename = "valueDate")]
    pub value_date: String,
}

#[derive(Debug, Serialize)]
pub struct RecalculateResponse {
    pub status: &'static str,
}

/// `POST /api/recalculate` (admin-only). Forces a fresh running-total
/// recompute for one group by re-emitting an event at its current
/// watermark-or-beyond ref_id — the same recompute-from-scratch path C6
/// already runs for every ordinary event (spec.md §7 "Partial failures ...
/// eventually restored via retry or manual recalculation").
pub async fn recalculate(
    State(state): State<AppState>,
    Json(request): Json<RecalculateRequest>,
) -> Result<Json<RecalculateResponse>> {
    let value_date = parse_date(&request.value_date)?;
    let group = GroupKey {
        pts: request.pts,
        processing_entity: request.processing_entity,
        counterparty_id: request.counterparty_id,
        value_date,
    };

    let latest = state
        .store
        .find_by_group_filtered(&group, i64::MAX)
        .await?
        .into_iter()
        .map(|s| s.ref_id)
        .max();

    let Some(ref_id) = latest else {
        return Err(ApiError::NotFound(format!("no settlements found for group {group}")));
    };

    state
        .running_total
        .emit(crate::services::SettlementEvent { group, ref_id })
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(RecalculateResponse { status: "queued" }))
}
