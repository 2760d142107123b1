/// Accounting export endpoints
///
/// # Endpoints
///
/// - `POST /v1/invoices/export` - format selector (dgii_606, csv,
///   quickbooks, xero, odoo, contaplus, json) over a date range
/// - `GET  /v1/export/csv` - shortcut for the generic CSV
///
/// Responses are downloadable files with the right content type and a
/// dated filename in the Content-Disposition header.

use axum::{
    extract::{Extension, State},
    http::{header, HeaderMap, HeaderValue},
    response::IntoResponse,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;

use invoiceflow_shared::auth::middleware::AuthContext;
use invoiceflow_shared::export::{self, ExportFormat};
use invoiceflow_shared::models::{Invoice, Setting};

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};

/// Export request
#[derive(Debug, Deserialize)]
pub struct ExportRequest {
    /// One of: dgii_606, csv, quickbooks, xero, odoo, contaplus, json
    pub format: String,

    /// Start of the invoice date range (default: beginning of time)
    pub date_from: Option<NaiveDate>,

    /// End of the invoice date range (default: today)
    pub date_to: Option<NaiveDate>,
}

async fn render_export(
    state: &AppState,
    organization_id: uuid::Uuid,
    format: ExportFormat,
    date_from: Option<NaiveDate>,
    date_to: Option<NaiveDate>,
) -> ApiResult<impl IntoResponse> {
    let from = date_from.unwrap_or(NaiveDate::MIN);
    let to = date_to.unwrap_or_else(|| Utc::now().date_naive());

    let invoices = Invoice::list_processed_in_range(&state.db, organization_id, from, to).await?;

    let company_tax_id = Setting::get_value(&state.db, organization_id, "company_tax_id")
        .await?
        .unwrap_or_default();

    let body = export::render(format, &invoices, &company_tax_id)?;

    let filename = format!(
        "invoiceflow_{}_{}.{}",
        format_tag(format),
        Utc::now().format("%Y%m%d"),
        format.file_extension(),
    );

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(format.content_type()),
    );
    if let Ok(value) =
        HeaderValue::from_str(&format!("attachment; filename=\"{}\"", filename))
    {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    Ok((headers, body))
}

fn format_tag(format: ExportFormat) -> &'static str {
    match format {
        ExportFormat::Dgii606 => "606",
        ExportFormat::Csv => "detalle",
        ExportFormat::Quickbooks => "quickbooks",
        ExportFormat::Xero => "xero",
        ExportFormat::Odoo => "odoo",
        ExportFormat::Contaplus => "contaplus",
        ExportFormat::Json => "completo",
    }
}

/// Format-selected export over a date range
pub async fn export_invoices(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    axum::Json(req): axum::Json<ExportRequest>,
) -> ApiResult<impl IntoResponse> {
    let format = ExportFormat::parse(&req.format)
        .ok_or_else(|| ApiError::BadRequest(format!("Unknown export format: {}", req.format)))?;

    render_export(
        &state,
        auth.organization_id,
        format,
        req.date_from,
        req.date_to,
    )
    .await
}

/// Generic CSV shortcut, the whole processed ledger
pub async fn export_csv(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<impl IntoResponse> {
    render_export(&state, auth.organization_id, ExportFormat::Csv, None, None).await
}
