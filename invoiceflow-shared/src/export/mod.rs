/// Accounting export formatters
///
/// Turns a slice of processed invoices into the file formats accountants
/// actually import:
///
/// - `dgii606`: the Dominican DGII 606 purchases report (pipe-delimited text)
/// - `csv`: generic CSV plus QuickBooks, Xero, Odoo, and Contaplus layouts
/// - JSON, rendered straight from the invoice models
///
/// All formatters are pure functions over already-loaded invoices; callers
/// query the rows and pick the period.

pub mod csv;
pub mod dgii606;

use crate::models::Invoice;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("CSV generation failed: {0}")]
    Csv(#[from] ::csv::Error),

    #[error("CSV output was not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No invoices in the selected period")]
    Empty,
}

/// Supported export formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Dgii606,
    Csv,
    Quickbooks,
    Xero,
    Odoo,
    Contaplus,
    Json,
}

impl ExportFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "606" | "dgii606" | "dgii_606" => Some(Self::Dgii606),
            "csv" => Some(Self::Csv),
            "quickbooks" => Some(Self::Quickbooks),
            "xero" => Some(Self::Xero),
            "odoo" => Some(Self::Odoo),
            "contaplus" => Some(Self::Contaplus),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Dgii606 => "text/plain; charset=utf-8",
            Self::Json => "application/json",
            _ => "text/csv; charset=utf-8",
        }
    }

    pub fn file_extension(&self) -> &'static str {
        match self {
            Self::Dgii606 => "txt",
            Self::Json => "json",
            _ => "csv",
        }
    }
}

/// Renders invoices into the requested format.
///
/// `company_tax_id` is the reporting company's RNC, required by the 606
/// header line.
pub fn render(
    format: ExportFormat,
    invoices: &[Invoice],
    company_tax_id: &str,
) -> Result<String, ExportError> {
    if invoices.is_empty() {
        return Err(ExportError::Empty);
    }

    match format {
        ExportFormat::Dgii606 => Ok(dgii606::render(invoices, company_tax_id)),
        ExportFormat::Csv => csv::render_generic(invoices),
        ExportFormat::Quickbooks => csv::render_quickbooks(invoices),
        ExportFormat::Xero => csv::render_xero(invoices),
        ExportFormat::Odoo => csv::render_odoo(invoices),
        ExportFormat::Contaplus => csv::render_contaplus(invoices),
        ExportFormat::Json => Ok(serde_json::to_string_pretty(invoices)?),
    }
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use crate::models::Invoice;
    use chrono::{NaiveDate, Utc};
    use sqlx::types::Json;
    use uuid::Uuid;

    /// A fully processed service invoice with valid fiscal data.
    pub fn sample_invoice() -> Invoice {
        Invoice {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            filename: "factura.jpg".to_string(),
            file_path: "uploads/factura.jpg".to_string(),
            file_type: "jpg".to_string(),
            vendor_name: Some("Ferretería Central".to_string()),
            invoice_number: Some("B0100000123".to_string()),
            invoice_date: NaiveDate::from_ymd_opt(2025, 3, 15),
            payment_date: None,
            total_amount: Some(1180.0),
            tax_amount: Some(180.0),
            currency: "DOP".to_string(),
            transaction_type: "expense".to_string(),
            category: Some("servicios".to_string()),
            description: None,
            line_items: Json(vec![]),
            raw_extracted_data: None,
            confidence_score: Some(0.9),
            audit_flags: Json(vec![]),
            vendor_tax_id: Some("131-11111-1".to_string()),
            vendor_country: Some("DOM".to_string()),
            vendor_fiscal_address: None,
            country_detection_method: Some("tax_id_pattern".to_string()),
            country_confidence: Some(0.8),
            goods_services_type: Some("02".to_string()),
            isr_retention_type: None,
            isr_retention_amount: None,
            itbis_retained: None,
            payment_method: Some("2".to_string()),
            ai_tokens_used: 1500,
            ai_cost_usd: 0.02,
            ai_model_used: Some("gpt-4o".to_string()),
            ai_processing_secs: Some(4.2),
            processed: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parse() {
        assert_eq!(ExportFormat::parse("606"), Some(ExportFormat::Dgii606));
        assert_eq!(ExportFormat::parse("dgii606"), Some(ExportFormat::Dgii606));
        assert_eq!(ExportFormat::parse("CSV"), Some(ExportFormat::Csv));
        assert_eq!(
            ExportFormat::parse("quickbooks"),
            Some(ExportFormat::Quickbooks)
        );
        assert_eq!(ExportFormat::parse("xlsx"), None);
    }

    #[test]
    fn test_empty_export_is_an_error() {
        let result = render(ExportFormat::Csv, &[], "101000001");
        assert!(matches!(result, Err(ExportError::Empty)));
    }
}
