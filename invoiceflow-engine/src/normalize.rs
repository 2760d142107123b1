/// Normalization of raw extraction output
///
/// The model returns loosely structured JSON. This module turns it into a
/// validated [`NormalizedInvoice`]: dates parsed, currency mapped, amounts
/// reconciled, fiscal codes resolved, and every correction recorded as an
/// audit flag so reviewers can see what was inferred versus extracted.
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::fiscal;

pub const DEFAULT_VENDOR: &str = "Proveedor no identificado";
pub const DEFAULT_CATEGORY: &str = "sin_categoria";
pub const DEFAULT_CURRENCY: &str = "DOP";
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%d-%m-%Y", "%Y/%m/%d"];

const KNOWN_CURRENCIES: &[&str] = &[
    "DOP", "USD", "EUR", "MXN", "COP", "ARS", "CLP", "PEN", "GTQ", "CRC", "HNL", "BRL", "GBP",
    "JPY", "CAD",
];

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("model response contained no JSON object")]
    NoJsonObject,

    #[error("failed to parse model JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Raw shape the extraction prompt asks the model to produce. Every field
/// is optional since vision extraction routinely misses some, and amounts
/// accept both numbers and string renditions like `"RD$1,180.00"`.
#[derive(Debug, Default, Deserialize)]
pub struct RawExtraction {
    pub vendor_name: Option<String>,
    pub vendor_tax_id: Option<String>,
    pub vendor_country: Option<String>,
    pub vendor_fiscal_address: Option<String>,
    pub invoice_number: Option<String>,
    pub invoice_date: Option<String>,
    pub payment_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub total_amount: Option<f64>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub tax_amount: Option<f64>,
    pub currency: Option<String>,
    pub transaction_type: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub goods_services_type: Option<String>,
    pub isr_retention_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub isr_retention_amount: Option<f64>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub itbis_retained: Option<f64>,
    pub payment_method: Option<String>,
    #[serde(default)]
    pub line_items: Vec<RawLineItem>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub confidence_score: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct RawLineItem {
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub quantity: Option<f64>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub unit_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub subtotal: Option<f64>,
}

/// Parses an amount the model typed as a string. Currency symbols,
/// thousands separators, and spaces are stripped first.
pub fn parse_amount_text(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .replace("RD$", "")
        .replace("US$", "")
        .chars()
        .filter(|c| !matches!(c, '$' | '€' | '£' | ',' | ' '))
        .collect();

    cleaned.trim().parse().ok()
}

/// Accepts amounts as JSON numbers, as strings (with or without currency
/// symbols), or as nothing at all. Unparseable strings become None rather
/// than failing the whole extraction.
fn lenient_amount<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrText {
        Number(f64),
        Text(String),
    }

    Ok(match Option::<NumberOrText>::deserialize(deserializer)? {
        None => None,
        Some(NumberOrText::Number(n)) => Some(n),
        Some(NumberOrText::Text(s)) => parse_amount_text(&s),
    })
}

/// A cleaned line item with its subtotal reconciled against qty * price.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedLineItem {
    pub description: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub subtotal: f64,
}

/// The fully normalized extraction, ready to be written to an invoice row.
#[derive(Debug, Clone)]
pub struct NormalizedInvoice {
    pub vendor_name: String,
    pub vendor_tax_id: Option<String>,
    pub vendor_country: Option<String>,
    pub vendor_fiscal_address: Option<String>,
    pub country_detection_method: String,
    pub country_confidence: f64,
    pub invoice_number: Option<String>,
    pub invoice_date: Option<NaiveDate>,
    pub payment_date: Option<NaiveDate>,
    pub total_amount: Option<f64>,
    pub tax_amount: Option<f64>,
    pub currency: String,
    pub transaction_type: String,
    pub category: String,
    pub description: Option<String>,
    pub goods_services_type: String,
    pub isr_retention_type: Option<String>,
    pub isr_retention_amount: Option<f64>,
    pub itbis_retained: Option<f64>,
    pub payment_method: Option<String>,
    pub line_items: Vec<NormalizedLineItem>,
    pub confidence_score: f64,
    pub audit_flags: Vec<String>,
    pub raw: JsonValue,
}

/// Slices the first JSON object out of a model reply. Models wrap their
/// answer in prose or markdown fences often enough that this cannot be
/// a plain `serde_json::from_str` on the whole string.
pub fn extract_json_object(text: &str) -> Result<&str, NormalizeError> {
    let start = text.find('{').ok_or(NormalizeError::NoJsonObject)?;
    let end = text.rfind('}').ok_or(NormalizeError::NoJsonObject)?;

    if end <= start {
        return Err(NormalizeError::NoJsonObject);
    }

    Ok(&text[start..=end])
}

/// Parses a date in any of the formats invoices actually use.
pub fn parse_invoice_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
}

/// Maps a currency symbol or code to an ISO 4217 code. Unknown values
/// fall back to DOP, the operating currency.
pub fn normalize_currency(raw: Option<&str>, warnings: &mut Vec<String>) -> String {
    let Some(raw) = raw else {
        return DEFAULT_CURRENCY.to_string();
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return DEFAULT_CURRENCY.to_string();
    }

    match trimmed {
        "RD$" | "rd$" => return "DOP".to_string(),
        "$" | "US$" => return "USD".to_string(),
        "€" => return "EUR".to_string(),
        _ => {}
    }

    let upper = trimmed.to_ascii_uppercase();
    if KNOWN_CURRENCIES.contains(&upper.as_str()) {
        return upper;
    }

    warnings.push(format!("Moneda no reconocida: {}", trimmed));
    DEFAULT_CURRENCY.to_string()
}

/// Trims a string field and drops empty values and the literal "null" /
/// "None" strings models emit for absent data.
fn clean_text(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| {
            !s.is_empty() && !s.eq_ignore_ascii_case("null") && !s.eq_ignore_ascii_case("none")
        })
}

fn normalize_line_items(raw: Vec<RawLineItem>, warnings: &mut Vec<String>) -> Vec<NormalizedLineItem> {
    let mut items = Vec::with_capacity(raw.len());

    for item in raw {
        let Some(description) = clean_text(item.description) else {
            continue;
        };

        let quantity = item.quantity.filter(|q| *q > 0.0).unwrap_or(1.0);
        let unit_price = item.unit_price.unwrap_or(0.0);
        let computed = quantity * unit_price;

        let subtotal = match item.subtotal {
            Some(s) if (s - computed).abs() <= 0.01 || unit_price == 0.0 => s,
            Some(s) => {
                warnings.push(format!(
                    "Subtotal recalculado para '{}': {:.2} -> {:.2}",
                    description, s, computed,
                ));
                computed
            }
            None => computed,
        };

        items.push(NormalizedLineItem {
            description,
            quantity,
            unit_price,
            subtotal,
        });
    }

    items
}

/// Normalizes a parsed extraction into reviewed, defaulted fields.
pub fn normalize(raw: RawExtraction, raw_json: JsonValue) -> NormalizedInvoice {
    let mut warnings = Vec::new();

    let vendor_name = clean_text(raw.vendor_name).unwrap_or_else(|| {
        warnings.push("No se pudo identificar el proveedor".to_string());
        DEFAULT_VENDOR.to_string()
    });

    let invoice_number = clean_text(raw.invoice_number)
        .and_then(|ncf| fiscal::process_ncf(&ncf, &mut warnings));

    let invoice_date = clean_text(raw.invoice_date).and_then(|d| {
        let parsed = parse_invoice_date(&d);
        if parsed.is_none() {
            warnings.push(format!("Fecha de factura no reconocida: {}", d));
        }
        parsed
    });

    let payment_date = clean_text(raw.payment_date).and_then(|d| parse_invoice_date(&d));

    let currency = normalize_currency(raw.currency.as_deref(), &mut warnings);

    let vendor_tax_id = clean_text(raw.vendor_tax_id);
    let detection = fiscal::detect_country(
        raw.vendor_country.as_deref(),
        vendor_tax_id.as_deref(),
        Some(&currency),
        &mut warnings,
    );

    let category = clean_text(raw.category)
        .map(|c| c.to_lowercase())
        .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());

    let description = clean_text(raw.description);

    let goods_services_type = clean_text(raw.goods_services_type)
        .and_then(|t| fiscal::normalize_goods_services_type(&t))
        .unwrap_or_else(|| {
            let hint = format!("{} {}", category, description.as_deref().unwrap_or(""));
            fiscal::infer_goods_services_type(&hint)
        });

    let isr_retention_type = clean_text(raw.isr_retention_type)
        .and_then(|t| fiscal::normalize_isr_retention_type(&t));

    let payment_method =
        clean_text(raw.payment_method).and_then(|m| fiscal::normalize_payment_method(&m));

    let transaction_type = match clean_text(raw.transaction_type).as_deref() {
        Some("income") => "income".to_string(),
        _ => "expense".to_string(),
    };

    let line_items = normalize_line_items(raw.line_items, &mut warnings);

    let confidence_score = raw
        .confidence_score
        .unwrap_or(DEFAULT_CONFIDENCE)
        .clamp(0.0, 1.0);

    NormalizedInvoice {
        vendor_name,
        vendor_tax_id,
        vendor_country: detection.country,
        vendor_fiscal_address: clean_text(raw.vendor_fiscal_address),
        country_detection_method: detection.method,
        country_confidence: detection.confidence,
        invoice_number,
        invoice_date,
        payment_date,
        total_amount: raw.total_amount,
        tax_amount: raw.tax_amount,
        currency,
        transaction_type,
        category,
        description,
        goods_services_type,
        isr_retention_type,
        isr_retention_amount: raw.isr_retention_amount,
        itbis_retained: raw.itbis_retained,
        payment_method,
        line_items,
        confidence_score,
        audit_flags: warnings,
        raw: raw_json,
    }
}

/// Parses and normalizes a model reply in one step.
pub fn normalize_response(text: &str) -> Result<NormalizedInvoice, NormalizeError> {
    let json = extract_json_object(text)?;
    let raw_json: JsonValue = serde_json::from_str(json)?;
    let raw: RawExtraction = serde_json::from_value(raw_json.clone())?;

    Ok(normalize(raw, raw_json))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_json_object() {
        let text = "Here is the result:\n```json\n{\"a\": 1}\n```\nDone.";
        assert_eq!(extract_json_object(text).unwrap(), "{\"a\": 1}");

        assert!(extract_json_object("no json here").is_err());
        assert!(extract_json_object("} backwards {").is_err());
    }

    #[test]
    fn test_parse_invoice_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2025, 3, 15).unwrap();

        assert_eq!(parse_invoice_date("2025-03-15"), Some(expected));
        assert_eq!(parse_invoice_date("15/03/2025"), Some(expected));
        assert_eq!(parse_invoice_date("03/15/2025"), Some(expected));
        assert_eq!(parse_invoice_date("15-03-2025"), Some(expected));
        assert_eq!(parse_invoice_date("2025/03/15"), Some(expected));
        assert_eq!(parse_invoice_date("el 15 de marzo"), None);
    }

    #[test]
    fn test_normalize_currency() {
        let mut warnings = Vec::new();

        assert_eq!(normalize_currency(Some("RD$"), &mut warnings), "DOP");
        assert_eq!(normalize_currency(Some("$"), &mut warnings), "USD");
        assert_eq!(normalize_currency(Some("€"), &mut warnings), "EUR");
        assert_eq!(normalize_currency(Some("usd"), &mut warnings), "USD");
        assert_eq!(normalize_currency(None, &mut warnings), "DOP");
        assert!(warnings.is_empty());

        assert_eq!(normalize_currency(Some("XYZ"), &mut warnings), "DOP");
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_normalize_defaults() {
        let invoice = normalize(RawExtraction::default(), json!({}));

        assert_eq!(invoice.vendor_name, DEFAULT_VENDOR);
        assert_eq!(invoice.transaction_type, "expense");
        assert_eq!(invoice.category, DEFAULT_CATEGORY);
        assert_eq!(invoice.currency, "DOP");
        assert_eq!(invoice.confidence_score, DEFAULT_CONFIDENCE);
        assert!(invoice
            .audit_flags
            .iter()
            .any(|f| f.contains("proveedor")));
    }

    #[test]
    fn test_confidence_clamped() {
        let raw = RawExtraction {
            confidence_score: Some(1.7),
            ..Default::default()
        };
        assert_eq!(normalize(raw, json!({})).confidence_score, 1.0);

        let raw = RawExtraction {
            confidence_score: Some(-0.2),
            ..Default::default()
        };
        assert_eq!(normalize(raw, json!({})).confidence_score, 0.0);
    }

    #[test]
    fn test_line_items_cleaned() {
        let raw = RawExtraction {
            line_items: vec![
                RawLineItem {
                    description: Some("Cemento gris".to_string()),
                    quantity: Some(10.0),
                    unit_price: Some(450.0),
                    // off by more than a cent, gets recomputed
                    subtotal: Some(4000.0),
                },
                RawLineItem {
                    description: None,
                    quantity: Some(1.0),
                    unit_price: Some(100.0),
                    subtotal: None,
                },
                RawLineItem {
                    description: Some("Flete".to_string()),
                    quantity: None,
                    unit_price: Some(800.0),
                    subtotal: None,
                },
            ],
            ..Default::default()
        };

        let invoice = normalize(raw, json!({}));

        assert_eq!(invoice.line_items.len(), 2);
        assert_eq!(invoice.line_items[0].subtotal, 4500.0);
        assert_eq!(invoice.line_items[1].quantity, 1.0);
        assert_eq!(invoice.line_items[1].subtotal, 800.0);
        assert!(invoice
            .audit_flags
            .iter()
            .any(|f| f.contains("Subtotal recalculado")));
    }

    #[test]
    fn test_goods_services_inferred_from_category() {
        let raw = RawExtraction {
            category: Some("Alquiler de local".to_string()),
            ..Default::default()
        };

        assert_eq!(normalize(raw, json!({})).goods_services_type, "03");
    }

    #[test]
    fn test_normalize_response_end_to_end() {
        let reply = r#"Claro, aquí está la extracción:
        {
            "vendor_name": "Ferretería Central",
            "vendor_tax_id": "101000001",
            "invoice_number": "b01-00000123",
            "invoice_date": "15/03/2025",
            "total_amount": 1180.0,
            "tax_amount": 180.0,
            "currency": "RD$",
            "category": "Materiales",
            "confidence_score": 0.92
        }"#;

        let invoice = normalize_response(reply).unwrap();

        assert_eq!(invoice.vendor_name, "Ferretería Central");
        assert_eq!(invoice.invoice_number.as_deref(), Some("B0100000123"));
        assert_eq!(
            invoice.invoice_date,
            NaiveDate::from_ymd_opt(2025, 3, 15)
        );
        assert_eq!(invoice.currency, "DOP");
        assert_eq!(invoice.vendor_country.as_deref(), Some("DOM"));
        assert_eq!(invoice.country_detection_method, "tax_id_pattern");
        assert_eq!(invoice.category, "materiales");
        assert_eq!(invoice.confidence_score, 0.92);
    }

    #[test]
    fn test_parse_amount_text() {
        assert_eq!(parse_amount_text("RD$1,180.00"), Some(1180.0));
        assert_eq!(parse_amount_text("$ 540.50"), Some(540.5));
        assert_eq!(parse_amount_text("€1.234"), Some(1.234));
        assert_eq!(parse_amount_text("1180"), Some(1180.0));
        assert_eq!(parse_amount_text("null"), None);
        assert_eq!(parse_amount_text(""), None);
    }

    #[test]
    fn test_string_amounts_and_null_literals_tolerated() {
        let reply = r#"{
            "vendor_name": "null",
            "invoice_number": "None",
            "total_amount": "RD$1,180.00",
            "tax_amount": "null",
            "itbis_retained": "18.00",
            "confidence_score": "0.85",
            "line_items": [
                {"description": "Cemento", "quantity": "2", "unit_price": "$590.00"}
            ]
        }"#;

        let invoice = normalize_response(reply).unwrap();

        assert_eq!(invoice.vendor_name, DEFAULT_VENDOR);
        assert_eq!(invoice.invoice_number, None);
        assert_eq!(invoice.total_amount, Some(1180.0));
        assert_eq!(invoice.tax_amount, None);
        assert_eq!(invoice.itbis_retained, Some(18.0));
        assert_eq!(invoice.confidence_score, 0.85);
        assert_eq!(invoice.line_items.len(), 1);
        assert_eq!(invoice.line_items[0].subtotal, 1180.0);
    }
}
