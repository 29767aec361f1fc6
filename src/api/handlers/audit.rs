//! Read-side ledger queries and export.

use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::SharedState;
use crate::error::{AppError, Result};
use crate::models::audit_record::{AuditAction, AuditRecord};
use crate::services::audit_service::{AuditChange, AuditContext};
use crate::store::{AuditQuery, AuditStore};

const MAX_PAGE_SIZE: i64 = 500;
const DEFAULT_PAGE_SIZE: i64 = 50;

#[derive(Debug, Deserialize)]
pub struct AuditListParams {
    pub actor_id: Option<String>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub action: Option<String>,
    pub module: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Serialize)]
pub struct AuditListResponse {
    pub entries: Vec<AuditRecord>,
    pub count: usize,
}

fn validate_range(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Result<()> {
    if let (Some(from), Some(to)) = (from, to) {
        if from > to {
            return Err(AppError::Validation(
                "'from' must not be later than 'to'".into(),
            ));
        }
    }
    Ok(())
}

/// Filterable, paged ledger query, newest first.
pub async fn list(
    State(state): State<SharedState>,
    Query(params): Query<AuditListParams>,
) -> Result<Json<AuditListResponse>> {
    validate_range(params.from, params.to)?;
    if let Some(action) = params.action.as_deref() {
        action
            .parse::<AuditAction>()
            .map_err(AppError::Validation)?;
    }
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    if !(1..=MAX_PAGE_SIZE).contains(&limit) {
        return Err(AppError::Validation(format!(
            "limit must be between 1 and {MAX_PAGE_SIZE}"
        )));
    }

    let filter = AuditQuery {
        actor_id: params.actor_id,
        entity_type: params.entity_type,
        entity_id: params.entity_id,
        action: params.action,
        module: params.module,
        from: params.from,
        to: params.to,
        offset: params.offset.unwrap_or(0).max(0),
        limit,
    };
    let entries = state.store.query(&filter).await?;
    let count = entries.len();
    Ok(Json(AuditListResponse { entries, count }))
}

#[derive(Debug, Deserialize)]
pub struct ExportParams {
    pub format: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Export the ledger over a range as CSV or JSON.
pub async fn export(
    State(state): State<SharedState>,
    Query(params): Query<ExportParams>,
) -> Result<Response> {
    validate_range(params.from, params.to)?;
    let format = params.format.as_deref().unwrap_or("json");
    if !matches!(format, "csv" | "json") {
        return Err(AppError::Validation(format!(
            "unsupported export format '{format}' (expected csv or json)"
        )));
    }

    let records = state.store.range_asc(params.from, params.to).await?;

    // Ledger exports are themselves audited.
    state
        .audit
        .log(
            AuditContext::system("audit"),
            AuditChange::new(AuditAction::Export, "AuditLedger", "ledger").metadata(
                serde_json::json!({ "format": format, "records": records.len() }),
            ),
        )
        .await;

    if format == "csv" {
        let body = render_csv(&records);
        Ok((
            [
                (header::CONTENT_TYPE, "text/csv"),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=\"audit-export.csv\"",
                ),
            ],
            body,
        )
            .into_response())
    } else {
        Ok(([(header::CONTENT_TYPE, "application/json")], Json(records)).into_response())
    }
}

fn render_csv(records: &[AuditRecord]) -> String {
    let mut out = String::from(
        "id,created_at,actor_id,actor_profile_id,action,module,entity_type,entity_id,entity_display,changed_fields,ip_address\n",
    );
    for record in records {
        let row = [
            record.id.to_string(),
            record.created_at.to_rfc3339(),
            record.actor_id.clone(),
            record
                .actor_profile_id
                .map(|id| id.to_string())
                .unwrap_or_default(),
            record.action.as_str().to_string(),
            record.module.clone(),
            record.entity_type.clone(),
            record.entity_id.clone(),
            record.entity_display.clone().unwrap_or_default(),
            record.changed_fields.join(";"),
            record.ip_address.clone().unwrap_or_default(),
        ];
        let escaped: Vec<String> = row.iter().map(|field| csv_escape(field)).collect();
        out.push_str(&escaped.join(","));
        out.push('\n');
    }
    out
}

/// Quote a CSV field when it contains a separator, quote, or newline.
fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
