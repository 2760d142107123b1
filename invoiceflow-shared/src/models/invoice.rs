/// Invoice model and database operations
///
/// An invoice row is created at upload time with only the file metadata
/// populated. The extraction pipeline later fills in the vendor, amounts,
/// and Dominican fiscal fields and flips `processed` to true. Manual review
/// may then correct any extracted field.
///
/// # Schema (abridged)
///
/// ```sql
/// CREATE TABLE invoices (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     organization_id UUID NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
///     filename VARCHAR(512) NOT NULL,
///     file_path VARCHAR(1024) NOT NULL,
///     file_type VARCHAR(10) NOT NULL,
///     vendor_name VARCHAR(255),
///     total_amount DOUBLE PRECISION,
///     line_items JSONB NOT NULL DEFAULT '[]',
///     audit_flags JSONB NOT NULL DEFAULT '[]',
///     processed BOOLEAN NOT NULL DEFAULT FALSE,
///     ...
/// );
/// ```
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

/// A single line item extracted from an invoice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub subtotal: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Invoice {
    pub id: Uuid,
    pub organization_id: Uuid,

    /// Original filename as uploaded
    pub filename: String,

    /// Path on disk under the uploads directory
    pub file_path: String,

    /// Lowercase file extension (jpg, png, pdf, ...)
    pub file_type: String,

    pub vendor_name: Option<String>,

    /// Fiscal receipt number (NCF), normalized to compact uppercase
    pub invoice_number: Option<String>,

    pub invoice_date: Option<NaiveDate>,
    pub payment_date: Option<NaiveDate>,
    pub total_amount: Option<f64>,
    pub tax_amount: Option<f64>,

    /// ISO 4217 currency code
    pub currency: String,

    /// "expense" or "income"
    pub transaction_type: String,

    pub category: Option<String>,
    pub description: Option<String>,
    pub line_items: Json<Vec<LineItem>>,

    /// Raw JSON returned by the extraction model, kept for debugging
    pub raw_extracted_data: Option<JsonValue>,

    /// Model confidence in [0, 1]
    pub confidence_score: Option<f64>,

    /// Human-readable warnings accumulated during normalization
    pub audit_flags: Json<Vec<String>>,

    // Dominican fiscal fields for DGII 606 reporting
    pub vendor_tax_id: Option<String>,
    pub vendor_country: Option<String>,
    pub vendor_fiscal_address: Option<String>,
    pub country_detection_method: Option<String>,
    pub country_confidence: Option<f64>,
    pub goods_services_type: Option<String>,
    pub isr_retention_type: Option<String>,
    pub isr_retention_amount: Option<f64>,
    pub itbis_retained: Option<f64>,
    pub payment_method: Option<String>,

    // AI cost accounting
    pub ai_tokens_used: i32,
    pub ai_cost_usd: f64,
    pub ai_model_used: Option<String>,
    pub ai_processing_secs: Option<f64>,

    pub processed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const INVOICE_COLUMNS: &str = "id, organization_id, filename, file_path, file_type, \
     vendor_name, invoice_number, invoice_date, payment_date, total_amount, tax_amount, \
     currency, transaction_type, category, description, line_items, raw_extracted_data, \
     confidence_score, audit_flags, vendor_tax_id, vendor_country, vendor_fiscal_address, \
     country_detection_method, country_confidence, goods_services_type, isr_retention_type, \
     isr_retention_amount, itbis_retained, payment_method, ai_tokens_used, ai_cost_usd, \
     ai_model_used, ai_processing_secs, processed, created_at, updated_at";

/// Input for creating an invoice row at upload time
#[derive(Debug, Clone)]
pub struct CreateInvoice {
    pub organization_id: Uuid,
    pub filename: String,
    pub file_path: String,
    pub file_type: String,
}

/// Fields written by the extraction pipeline
#[derive(Debug, Clone, Default)]
pub struct ExtractionResultUpdate {
    pub vendor_name: Option<String>,
    pub invoice_number: Option<String>,
    pub invoice_date: Option<NaiveDate>,
    pub payment_date: Option<NaiveDate>,
    pub total_amount: Option<f64>,
    pub tax_amount: Option<f64>,
    pub currency: String,
    pub transaction_type: String,
    pub category: Option<String>,
    pub description: Option<String>,
    pub line_items: Vec<LineItem>,
    pub raw_extracted_data: Option<JsonValue>,
    pub confidence_score: Option<f64>,
    pub audit_flags: Vec<String>,
    pub vendor_tax_id: Option<String>,
    pub vendor_country: Option<String>,
    pub vendor_fiscal_address: Option<String>,
    pub country_detection_method: Option<String>,
    pub country_confidence: Option<f64>,
    pub goods_services_type: Option<String>,
    pub isr_retention_type: Option<String>,
    pub isr_retention_amount: Option<f64>,
    pub itbis_retained: Option<f64>,
    pub payment_method: Option<String>,
    pub ai_tokens_used: i32,
    pub ai_cost_usd: f64,
    pub ai_model_used: Option<String>,
    pub ai_processing_secs: Option<f64>,
}

/// Manual corrections applied during review. Only `Some` fields are written.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateInvoice {
    pub vendor_name: Option<String>,
    pub invoice_number: Option<String>,
    pub invoice_date: Option<NaiveDate>,
    pub payment_date: Option<NaiveDate>,
    pub total_amount: Option<f64>,
    pub tax_amount: Option<f64>,
    pub currency: Option<String>,
    pub transaction_type: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub vendor_tax_id: Option<String>,
    pub vendor_country: Option<String>,
    pub goods_services_type: Option<String>,
    pub isr_retention_type: Option<String>,
    pub isr_retention_amount: Option<f64>,
    pub itbis_retained: Option<f64>,
    pub payment_method: Option<String>,
}

/// Query filters for listing invoices
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvoiceFilter {
    pub processed: Option<bool>,
    pub transaction_type: Option<String>,
    pub category: Option<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    /// Case-insensitive match against vendor name
    pub vendor: Option<String>,
    /// Case-insensitive match against vendor, invoice number, or description
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Aggregate counts and sums for the dashboard
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct InvoiceStats {
    pub total_invoices: i64,
    pub processed_invoices: i64,
    pub pending_invoices: i64,
    pub total_amount: f64,
    pub total_income: f64,
    pub total_expense: f64,
    pub total_tax: f64,
    pub total_ai_cost_usd: f64,
}

/// AI spend grouped by model
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ModelCost {
    pub model: String,
    pub invoice_count: i64,
    pub tokens_used: i64,
    pub cost_usd: f64,
}

/// One row of the monthly totals series
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MonthlyTotal {
    /// First day of the month
    pub month: NaiveDate,
    pub invoice_count: i64,
    pub total_amount: f64,
}

/// One row of the category breakdown
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CategoryTotal {
    pub category: String,
    pub invoice_count: i64,
    pub total_amount: f64,
}

impl Invoice {
    pub async fn create(pool: &PgPool, data: CreateInvoice) -> Result<Self, sqlx::Error> {
        let query = format!(
            "INSERT INTO invoices (organization_id, filename, file_path, file_type)
             VALUES ($1, $2, $3, $4)
             RETURNING {INVOICE_COLUMNS}"
        );

        let invoice = sqlx::query_as::<_, Invoice>(&query)
            .bind(data.organization_id)
            .bind(data.filename)
            .bind(data.file_path)
            .bind(data.file_type)
            .fetch_one(pool)
            .await?;

        Ok(invoice)
    }

    pub async fn find_by_id_and_org(
        pool: &PgPool,
        id: Uuid,
        organization_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = $1 AND organization_id = $2"
        );

        let invoice = sqlx::query_as::<_, Invoice>(&query)
            .bind(id)
            .bind(organization_id)
            .fetch_optional(pool)
            .await?;

        Ok(invoice)
    }

    /// Lists invoices for an organization with optional filters, newest first.
    pub async fn list(
        pool: &PgPool,
        organization_id: Uuid,
        filter: &InvoiceFilter,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let mut query = format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE organization_id = $1"
        );
        let mut bind_count = 1;

        if filter.processed.is_some() {
            bind_count += 1;
            query.push_str(&format!(" AND processed = ${bind_count}"));
        }
        if filter.transaction_type.is_some() {
            bind_count += 1;
            query.push_str(&format!(" AND transaction_type = ${bind_count}"));
        }
        if filter.category.is_some() {
            bind_count += 1;
            query.push_str(&format!(" AND category = ${bind_count}"));
        }
        if filter.date_from.is_some() {
            bind_count += 1;
            query.push_str(&format!(" AND invoice_date >= ${bind_count}"));
        }
        if filter.date_to.is_some() {
            bind_count += 1;
            query.push_str(&format!(" AND invoice_date <= ${bind_count}"));
        }
        if filter.vendor.is_some() {
            bind_count += 1;
            query.push_str(&format!(" AND vendor_name ILIKE ${bind_count}"));
        }
        if filter.search.is_some() {
            bind_count += 1;
            query.push_str(&format!(
                " AND (vendor_name ILIKE ${bind_count} \
                 OR invoice_number ILIKE ${bind_count} \
                 OR description ILIKE ${bind_count})"
            ));
        }

        query.push_str(" ORDER BY created_at DESC");

        bind_count += 1;
        query.push_str(&format!(" LIMIT ${bind_count}"));
        bind_count += 1;
        query.push_str(&format!(" OFFSET ${bind_count}"));

        let mut q = sqlx::query_as::<_, Invoice>(&query).bind(organization_id);

        if let Some(processed) = filter.processed {
            q = q.bind(processed);
        }
        if let Some(ref transaction_type) = filter.transaction_type {
            q = q.bind(transaction_type);
        }
        if let Some(ref category) = filter.category {
            q = q.bind(category);
        }
        if let Some(date_from) = filter.date_from {
            q = q.bind(date_from);
        }
        if let Some(date_to) = filter.date_to {
            q = q.bind(date_to);
        }
        if let Some(ref vendor) = filter.vendor {
            q = q.bind(format!("%{vendor}%"));
        }
        if let Some(ref search) = filter.search {
            q = q.bind(format!("%{search}%"));
        }

        q = q
            .bind(filter.limit.unwrap_or(50).clamp(1, 500))
            .bind(filter.offset.unwrap_or(0).max(0));

        q.fetch_all(pool).await
    }

    /// Writes the complete extraction result and marks the invoice processed.
    pub async fn apply_extraction(
        pool: &PgPool,
        id: Uuid,
        organization_id: Uuid,
        data: ExtractionResultUpdate,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "UPDATE invoices SET
                vendor_name = $3, invoice_number = $4, invoice_date = $5, payment_date = $6,
                total_amount = $7, tax_amount = $8, currency = $9, transaction_type = $10,
                category = $11, description = $12, line_items = $13, raw_extracted_data = $14,
                confidence_score = $15, audit_flags = $16, vendor_tax_id = $17,
                vendor_country = $18, vendor_fiscal_address = $19,
                country_detection_method = $20, country_confidence = $21,
                goods_services_type = $22, isr_retention_type = $23,
                isr_retention_amount = $24, itbis_retained = $25, payment_method = $26,
                ai_tokens_used = $27, ai_cost_usd = $28, ai_model_used = $29,
                ai_processing_secs = $30, processed = TRUE, updated_at = NOW()
             WHERE id = $1 AND organization_id = $2
             RETURNING {INVOICE_COLUMNS}"
        );

        let invoice = sqlx::query_as::<_, Invoice>(&query)
            .bind(id)
            .bind(organization_id)
            .bind(data.vendor_name)
            .bind(data.invoice_number)
            .bind(data.invoice_date)
            .bind(data.payment_date)
            .bind(data.total_amount)
            .bind(data.tax_amount)
            .bind(data.currency)
            .bind(data.transaction_type)
            .bind(data.category)
            .bind(data.description)
            .bind(Json(data.line_items))
            .bind(data.raw_extracted_data)
            .bind(data.confidence_score)
            .bind(Json(data.audit_flags))
            .bind(data.vendor_tax_id)
            .bind(data.vendor_country)
            .bind(data.vendor_fiscal_address)
            .bind(data.country_detection_method)
            .bind(data.country_confidence)
            .bind(data.goods_services_type)
            .bind(data.isr_retention_type)
            .bind(data.isr_retention_amount)
            .bind(data.itbis_retained)
            .bind(data.payment_method)
            .bind(data.ai_tokens_used)
            .bind(data.ai_cost_usd)
            .bind(data.ai_model_used)
            .bind(data.ai_processing_secs)
            .fetch_optional(pool)
            .await?;

        Ok(invoice)
    }

    /// Applies manual review corrections. Only non-None fields are written.
    pub async fn update(
        pool: &PgPool,
        id: Uuid,
        organization_id: Uuid,
        data: UpdateInvoice,
    ) -> Result<Option<Self>, sqlx::Error> {
        let mut query = String::from("UPDATE invoices SET updated_at = NOW()");
        let mut bind_count = 2;

        macro_rules! push_set {
            ($field:expr, $column:literal) => {
                if $field.is_some() {
                    bind_count += 1;
                    query.push_str(&format!(", {} = ${}", $column, bind_count));
                }
            };
        }

        push_set!(data.vendor_name, "vendor_name");
        push_set!(data.invoice_number, "invoice_number");
        push_set!(data.invoice_date, "invoice_date");
        push_set!(data.payment_date, "payment_date");
        push_set!(data.total_amount, "total_amount");
        push_set!(data.tax_amount, "tax_amount");
        push_set!(data.currency, "currency");
        push_set!(data.transaction_type, "transaction_type");
        push_set!(data.category, "category");
        push_set!(data.description, "description");
        push_set!(data.vendor_tax_id, "vendor_tax_id");
        push_set!(data.vendor_country, "vendor_country");
        push_set!(data.goods_services_type, "goods_services_type");
        push_set!(data.isr_retention_type, "isr_retention_type");
        push_set!(data.isr_retention_amount, "isr_retention_amount");
        push_set!(data.itbis_retained, "itbis_retained");
        push_set!(data.payment_method, "payment_method");

        query.push_str(&format!(
            " WHERE id = $1 AND organization_id = $2 RETURNING {INVOICE_COLUMNS}"
        ));

        let mut q = sqlx::query_as::<_, Invoice>(&query)
            .bind(id)
            .bind(organization_id);

        // Binds by reference; `data` is still needed below to decide which
        // audit flags the correction resolves.
        macro_rules! bind_set {
            ($field:expr) => {
                if let Some(ref value) = $field {
                    q = q.bind(value);
                }
            };
        }

        bind_set!(data.vendor_name);
        bind_set!(data.invoice_number);
        bind_set!(data.invoice_date);
        bind_set!(data.payment_date);
        bind_set!(data.total_amount);
        bind_set!(data.tax_amount);
        bind_set!(data.currency);
        bind_set!(data.transaction_type);
        bind_set!(data.category);
        bind_set!(data.description);
        bind_set!(data.vendor_tax_id);
        bind_set!(data.vendor_country);
        bind_set!(data.goods_services_type);
        bind_set!(data.isr_retention_type);
        bind_set!(data.isr_retention_amount);
        bind_set!(data.itbis_retained);
        bind_set!(data.payment_method);

        let invoice = q.fetch_optional(pool).await?;

        let Some(invoice) = invoice else {
            return Ok(None);
        };

        // Corrections resolve the audit warnings attached to those fields
        let retained: Vec<String> = invoice
            .audit_flags
            .0
            .iter()
            .filter(|flag| !Self::flag_resolved_by(flag, &data))
            .cloned()
            .collect();

        if retained.len() == invoice.audit_flags.0.len() {
            return Ok(Some(invoice));
        }

        let query = format!(
            "UPDATE invoices SET audit_flags = $3, updated_at = NOW()
             WHERE id = $1 AND organization_id = $2 RETURNING {INVOICE_COLUMNS}"
        );

        sqlx::query_as::<_, Invoice>(&query)
            .bind(id)
            .bind(organization_id)
            .bind(Json(retained))
            .fetch_optional(pool)
            .await
    }

    /// Whether a review correction addresses the field this flag warns about.
    fn flag_resolved_by(flag: &str, data: &UpdateInvoice) -> bool {
        (data.invoice_number.is_some() && flag.contains("NCF"))
            || (data.currency.is_some() && flag.contains("Moneda"))
            || (data.vendor_name.is_some() && flag.contains("proveedor"))
            || (data.invoice_date.is_some() && flag.contains("Fecha de factura"))
            || (data.vendor_country.is_some() && flag.contains("RNC/Tax ID"))
    }

    /// Deletes an invoice and returns its file path so the caller can remove
    /// the file from disk.
    pub async fn delete(
        pool: &PgPool,
        id: Uuid,
        organization_id: Uuid,
    ) -> Result<Option<String>, sqlx::Error> {
        let file_path: Option<(String,)> = sqlx::query_as(
            "DELETE FROM invoices WHERE id = $1 AND organization_id = $2 RETURNING file_path",
        )
        .bind(id)
        .bind(organization_id)
        .fetch_optional(pool)
        .await?;

        Ok(file_path.map(|(p,)| p))
    }

    /// Processed invoices with an invoice date inside the given range,
    /// ordered by date. Used by the export formatters.
    pub async fn list_processed_in_range(
        pool: &PgPool,
        organization_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices
             WHERE organization_id = $1 AND processed = TRUE
               AND invoice_date >= $2 AND invoice_date <= $3
             ORDER BY invoice_date ASC"
        );

        sqlx::query_as::<_, Invoice>(&query)
            .bind(organization_id)
            .bind(from)
            .bind(to)
            .fetch_all(pool)
            .await
    }

    pub async fn stats(pool: &PgPool, organization_id: Uuid) -> Result<InvoiceStats, sqlx::Error> {
        sqlx::query_as::<_, InvoiceStats>(
            r#"
            SELECT
                COUNT(*) AS total_invoices,
                COUNT(*) FILTER (WHERE processed) AS processed_invoices,
                COUNT(*) FILTER (WHERE NOT processed) AS pending_invoices,
                COALESCE(SUM(total_amount), 0.0) AS total_amount,
                COALESCE(SUM(total_amount) FILTER (WHERE transaction_type = 'income'), 0.0)
                    AS total_income,
                COALESCE(SUM(total_amount) FILTER (WHERE transaction_type = 'expense'), 0.0)
                    AS total_expense,
                COALESCE(SUM(tax_amount), 0.0) AS total_tax,
                COALESCE(SUM(ai_cost_usd), 0.0) AS total_ai_cost_usd
            FROM invoices
            WHERE organization_id = $1
            "#,
        )
        .bind(organization_id)
        .fetch_one(pool)
        .await
    }

    /// Invoice counts and amounts per calendar month over the trailing window.
    pub async fn monthly_totals(
        pool: &PgPool,
        organization_id: Uuid,
        months: i32,
    ) -> Result<Vec<MonthlyTotal>, sqlx::Error> {
        sqlx::query_as::<_, MonthlyTotal>(
            r#"
            SELECT
                date_trunc('month', invoice_date)::date AS month,
                COUNT(*) AS invoice_count,
                COALESCE(SUM(total_amount), 0.0) AS total_amount
            FROM invoices
            WHERE organization_id = $1
              AND invoice_date IS NOT NULL
              AND invoice_date >= (CURRENT_DATE - ($2 || ' months')::interval)
            GROUP BY 1
            ORDER BY 1 ASC
            "#,
        )
        .bind(organization_id)
        .bind(months.to_string())
        .fetch_all(pool)
        .await
    }

    pub async fn category_breakdown(
        pool: &PgPool,
        organization_id: Uuid,
    ) -> Result<Vec<CategoryTotal>, sqlx::Error> {
        sqlx::query_as::<_, CategoryTotal>(
            r#"
            SELECT
                COALESCE(category, 'sin_categoria') AS category,
                COUNT(*) AS invoice_count,
                COALESCE(SUM(total_amount), 0.0) AS total_amount
            FROM invoices
            WHERE organization_id = $1 AND processed = TRUE
            GROUP BY 1
            ORDER BY total_amount DESC
            "#,
        )
        .bind(organization_id)
        .fetch_all(pool)
        .await
    }

    /// Total AI spend in USD for invoices created since the given instant.
    /// Drives the daily cost gate; keyed on created_at so a later manual
    /// edit does not re-count old spend against today's budget.
    pub async fn ai_cost_since(
        pool: &PgPool,
        organization_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<f64, sqlx::Error> {
        let (cost,): (f64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(ai_cost_usd), 0.0) FROM invoices
             WHERE organization_id = $1 AND created_at >= $2",
        )
        .bind(organization_id)
        .bind(since)
        .fetch_one(pool)
        .await?;

        Ok(cost)
    }

    /// AI spend broken down by model, most expensive first.
    pub async fn ai_cost_by_model(
        pool: &PgPool,
        organization_id: Uuid,
    ) -> Result<Vec<ModelCost>, sqlx::Error> {
        sqlx::query_as::<_, ModelCost>(
            r#"
            SELECT
                ai_model_used AS model,
                COUNT(*) AS invoice_count,
                COALESCE(SUM(ai_tokens_used), 0)::bigint AS tokens_used,
                COALESCE(SUM(ai_cost_usd), 0.0) AS cost_usd
            FROM invoices
            WHERE organization_id = $1 AND ai_model_used IS NOT NULL
            GROUP BY 1
            ORDER BY cost_usd DESC
            "#,
        )
        .bind(organization_id)
        .fetch_all(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_item_roundtrip() {
        let item = LineItem {
            description: "Papel bond 8.5x11".to_string(),
            quantity: 3.0,
            unit_price: 250.0,
            subtotal: 750.0,
        };

        let json = serde_json::to_string(&item).unwrap();
        let back: LineItem = serde_json::from_str(&json).unwrap();
        assert_eq!(item, back);
    }

    #[test]
    fn test_invoice_filter_defaults() {
        let filter = InvoiceFilter::default();
        assert!(filter.processed.is_none());
        assert!(filter.limit.is_none());
    }

    #[test]
    fn test_correcting_ncf_resolves_its_flag() {
        let update = UpdateInvoice {
            invoice_number: Some("B0100000123".to_string()),
            ..Default::default()
        };

        assert!(Invoice::flag_resolved_by(
            "NCF con formato no reconocido: X123",
            &update
        ));
        assert!(!Invoice::flag_resolved_by(
            "Moneda no reconocida: XYZ",
            &update
        ));
    }

    // Integration tests for database operations are in tests/
}
