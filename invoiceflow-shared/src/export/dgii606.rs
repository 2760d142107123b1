/// DGII 606 purchases report
///
/// Format 606 is the monthly report of goods and services purchases that
/// Dominican taxpayers file with the DGII. Output is pipe-delimited text:
/// one header line identifying the reporting company and period, one column
/// header line, then one line per invoice.
///
/// Rows with missing fiscal data are still emitted, with the problem named
/// in the Estado column so the accountant can fix the invoice and re-export.
/// Columns the normalized invoice does not carry (NCF modificado, ISC,
/// propina legal, the percibido fields) are read from the raw extraction
/// JSON when the model reported them.
use serde_json::Value as JsonValue;

use crate::models::Invoice;

/// Goods/services type codes that classify a purchase as goods
const GOODS_TYPE_CODES: &[&str] = &["04", "09", "10"];

/// Category keywords that classify a purchase as goods when the type code
/// is missing
const GOODS_CATEGORY_KEYWORDS: &[&str] = &[
    "oficina",
    "inventario",
    "mercancia",
    "compras",
    "equipos",
    "activos",
    "maquinaria",
];

/// One computed 606 row, matching the official template column for column
#[derive(Debug, Clone)]
pub struct Row606 {
    pub rnc_cedula: String,
    pub tipo_id: String,
    pub tipo_bienes_servicios: String,
    pub ncf: String,
    pub ncf_modificado: String,
    pub fecha_comprobante: String,
    pub fecha_pago: String,
    pub monto_servicios: f64,
    pub monto_bienes: f64,
    pub total_monto_facturado: f64,
    pub itbis_facturado: f64,
    pub itbis_retenido: f64,
    pub itbis_proporcionalidad: f64,
    pub itbis_llevado_costo: f64,
    pub itbis_adelantar: f64,
    pub itbis_percibido: f64,
    pub tipo_retencion_isr: String,
    pub monto_retencion_renta: f64,
    pub isr_percibido: f64,
    pub isc: f64,
    pub otros_impuestos: f64,
    pub propina_legal: f64,
    pub forma_pago: String,
    pub estado: String,
}

/// Reads a numeric field out of the raw extraction JSON, tolerating the
/// string renditions models produce.
fn raw_amount(invoice: &Invoice, key: &str) -> Option<f64> {
    match invoice.raw_extracted_data.as_ref()?.get(key)? {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    }
}

/// Reads a text field out of the raw extraction JSON.
fn raw_text(invoice: &Invoice, key: &str) -> Option<String> {
    match invoice.raw_extracted_data.as_ref()?.get(key)? {
        JsonValue::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        _ => None,
    }
}

/// Digits-only view of a tax ID
fn normalize_tax_id(tax_id: &str) -> String {
    tax_id.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// DGII identification type: "1" for a 9-digit RNC, "2" for an 11-digit
/// cédula, empty when the ID is missing or malformed.
fn tipo_id_for(tax_id: &str) -> &'static str {
    match tax_id.len() {
        9 => "1",
        11 => "2",
        _ => "",
    }
}

/// Whether the purchase counts as goods for the bienes/servicios split.
fn is_goods_purchase(invoice: &Invoice) -> bool {
    if let Some(ref code) = invoice.goods_services_type {
        if GOODS_TYPE_CODES.contains(&code.as_str()) {
            return true;
        }
    }

    if let Some(ref category) = invoice.category {
        let lower = category.to_lowercase();
        return GOODS_CATEGORY_KEYWORDS.iter().any(|kw| lower.contains(kw));
    }

    false
}

/// Taxable base: total minus ITBIS, falling back to the sum of line item
/// subtotals when the total was not extracted.
fn taxable_base(invoice: &Invoice) -> f64 {
    let total = invoice.total_amount.unwrap_or(0.0);
    let tax = invoice.tax_amount.unwrap_or(0.0);

    if total > 0.0 {
        (total - tax).max(0.0)
    } else {
        invoice.line_items.0.iter().map(|li| li.subtotal).sum()
    }
}

/// Computes a 606 row from an invoice, collecting data problems into the
/// Estado column.
pub fn compute_row(invoice: &Invoice) -> Row606 {
    let mut issues: Vec<&str> = Vec::new();

    let rnc_cedula = invoice
        .vendor_tax_id
        .as_deref()
        .map(normalize_tax_id)
        .unwrap_or_default();
    let tipo_id = tipo_id_for(&rnc_cedula);
    if tipo_id.is_empty() {
        issues.push("Falta RNC/Cédula");
    }

    let ncf = invoice.invoice_number.clone().unwrap_or_default();
    if ncf.is_empty() {
        issues.push("Falta NCF");
    }

    let fecha_comprobante = invoice
        .invoice_date
        .map(|d| d.format("%Y%m%d").to_string())
        .unwrap_or_default();
    if fecha_comprobante.is_empty() {
        issues.push("Falta fecha");
    }

    let fecha_pago = invoice
        .payment_date
        .map(|d| d.format("%Y%m%d").to_string())
        .unwrap_or_default();

    let has_retention =
        invoice.isr_retention_amount.unwrap_or(0.0) > 0.0 || invoice.itbis_retained.unwrap_or(0.0) > 0.0;
    if has_retention && fecha_pago.is_empty() {
        issues.push("Falta fecha de pago para retenciones");
    }

    let base = taxable_base(invoice);
    let itbis_facturado = invoice.tax_amount.unwrap_or(0.0);

    // The model may have split the base itself; otherwise classify the
    // whole purchase and complement whichever side is missing
    let raw_servicios = raw_amount(invoice, "services_amount");
    let raw_bienes = raw_amount(invoice, "goods_amount");
    let (monto_bienes, monto_servicios) = match (raw_bienes, raw_servicios) {
        (Some(b), Some(s)) => (b, s),
        (Some(b), None) => (b, (base - b).max(0.0)),
        (None, Some(s)) => ((base - s).max(0.0), s),
        (None, None) => {
            if is_goods_purchase(invoice) {
                (base, 0.0)
            } else {
                (0.0, base)
            }
        }
    };
    let total_monto_facturado = monto_bienes + monto_servicios;

    // ITBIS on goods purchases goes to cost; the remainder is creditable
    let itbis_llevado_costo = raw_amount(invoice, "itbis_llevado_costo")
        .unwrap_or(if monto_bienes > 0.0 { itbis_facturado } else { 0.0 });
    let itbis_adelantar = (itbis_facturado - itbis_llevado_costo).max(0.0);

    let estado = if issues.is_empty() {
        "OK".to_string()
    } else {
        issues.join("; ")
    };

    Row606 {
        rnc_cedula,
        tipo_id: tipo_id.to_string(),
        tipo_bienes_servicios: invoice.goods_services_type.clone().unwrap_or_default(),
        ncf,
        ncf_modificado: raw_text(invoice, "ncf_modified").unwrap_or_default(),
        fecha_comprobante,
        fecha_pago,
        monto_servicios,
        monto_bienes,
        total_monto_facturado,
        itbis_facturado,
        itbis_retenido: invoice.itbis_retained.unwrap_or(0.0),
        itbis_proporcionalidad: raw_amount(invoice, "itbis_proporcionalidad").unwrap_or(0.0),
        itbis_llevado_costo,
        itbis_adelantar,
        itbis_percibido: raw_amount(invoice, "itbis_percibido").unwrap_or(0.0),
        tipo_retencion_isr: invoice.isr_retention_type.clone().unwrap_or_default(),
        monto_retencion_renta: invoice.isr_retention_amount.unwrap_or(0.0),
        isr_percibido: raw_amount(invoice, "isr_percibido").unwrap_or(0.0),
        isc: raw_amount(invoice, "isc_amount").unwrap_or(0.0),
        otros_impuestos: raw_amount(invoice, "other_taxes").unwrap_or(0.0),
        propina_legal: raw_amount(invoice, "legal_tip").unwrap_or(0.0),
        forma_pago: invoice.payment_method.clone().unwrap_or_default(),
        estado,
    }
}

/// Reporting period in AAAAMM, taken from the most recent invoice date.
pub fn report_period(invoices: &[Invoice]) -> String {
    invoices
        .iter()
        .filter_map(|i| i.invoice_date)
        .max()
        .map(|d| d.format("%Y%m").to_string())
        .unwrap_or_default()
}

/// Renders the pipe-delimited 606 report.
pub fn render(invoices: &[Invoice], company_tax_id: &str) -> String {
    let period = report_period(invoices);
    let mut out = String::new();

    out.push_str(&format!(
        "606|{}|{}|{}\n",
        normalize_tax_id(company_tax_id),
        period,
        invoices.len()
    ));
    out.push_str(
        "RNC_CEDULA|TIPO_ID|TIPO_BIENES_SERVICIOS|NCF|NCF_DOCUMENTO_MODIFICADO|\
         FECHA_COMPROBANTE|FECHA_PAGO|MONTO_SERVICIOS|MONTO_BIENES|TOTAL_MONTO_FACTURADO|\
         ITBIS_FACTURADO|ITBIS_RETENIDO|ITBIS_PROPORCIONALIDAD|ITBIS_LLEVADO_COSTO|\
         ITBIS_ADELANTAR|ITBIS_PERCIBIDO_COMPRAS|TIPO_RETENCION_ISR|MONTO_RETENCION_RENTA|\
         ISR_PERCIBIDO_COMPRAS|IMPUESTO_SELECTIVO_CONSUMO|OTROS_IMPUESTOS_TASAS|\
         MONTO_PROPINA_LEGAL|FORMA_PAGO|ESTADO\n",
    );

    for invoice in invoices {
        let row = compute_row(invoice);
        out.push_str(&format!(
            "{}|{}|{}|{}|{}|{}|{}|{:.2}|{:.2}|{:.2}|{:.2}|{:.2}|{:.2}|{:.2}|{:.2}|{:.2}|{}|{:.2}|{:.2}|{:.2}|{:.2}|{:.2}|{}|{}\n",
            row.rnc_cedula,
            row.tipo_id,
            row.tipo_bienes_servicios,
            row.ncf,
            row.ncf_modificado,
            row.fecha_comprobante,
            row.fecha_pago,
            row.monto_servicios,
            row.monto_bienes,
            row.total_monto_facturado,
            row.itbis_facturado,
            row.itbis_retenido,
            row.itbis_proporcionalidad,
            row.itbis_llevado_costo,
            row.itbis_adelantar,
            row.itbis_percibido,
            row.tipo_retencion_isr,
            row.monto_retencion_renta,
            row.isr_percibido,
            row.isc,
            row.otros_impuestos,
            row.propina_legal,
            row.forma_pago,
            row.estado,
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::test_fixtures::sample_invoice as test_invoice;
    use crate::models::invoice::LineItem;
    use chrono::NaiveDate;
    use serde_json::json;
    use sqlx::types::Json;

    #[test]
    fn test_tipo_id_classification() {
        assert_eq!(tipo_id_for("101000001"), "1"); // 9-digit RNC
        assert_eq!(tipo_id_for("00112345678"), "2"); // 11-digit cédula
        assert_eq!(tipo_id_for("12345"), "");
        assert_eq!(tipo_id_for(""), "");
    }

    #[test]
    fn test_normalize_tax_id_strips_separators() {
        assert_eq!(normalize_tax_id("131-11111-1"), "131111111");
        assert_eq!(normalize_tax_id("101 000 001"), "101000001");
    }

    #[test]
    fn test_malformed_tax_id_flagged() {
        let mut invoice = test_invoice();
        invoice.vendor_tax_id = Some("12345".to_string());
        let row = compute_row(&invoice);

        assert_eq!(row.tipo_id, "");
        assert!(row.estado.contains("Falta RNC/Cédula"));
    }

    #[test]
    fn test_rnc_vendor_ok() {
        let invoice = test_invoice();
        let row = compute_row(&invoice);

        assert_eq!(row.tipo_id, "1");
        assert_eq!(row.estado, "OK");
        assert_eq!(row.total_monto_facturado, 1000.0);
        assert_eq!(row.monto_servicios, 1000.0);
        assert_eq!(row.monto_bienes, 0.0);
        assert_eq!(row.itbis_facturado, 180.0);
        assert_eq!(row.itbis_adelantar, 180.0);
        assert_eq!(row.itbis_llevado_costo, 0.0);
        assert_eq!(row.fecha_comprobante, "20250315");
    }

    #[test]
    fn test_goods_split_by_type_code() {
        let mut invoice = test_invoice();
        invoice.goods_services_type = Some("09".to_string());
        let row = compute_row(&invoice);

        assert_eq!(row.monto_bienes, 1000.0);
        assert_eq!(row.monto_servicios, 0.0);
        assert_eq!(row.itbis_llevado_costo, 180.0);
        assert_eq!(row.itbis_adelantar, 0.0);
    }

    #[test]
    fn test_goods_split_by_category_keyword() {
        let mut invoice = test_invoice();
        invoice.goods_services_type = None;
        invoice.category = Some("Materiales de oficina".to_string());

        assert!(is_goods_purchase(&invoice));
    }

    #[test]
    fn test_missing_fiscal_data_reported_in_estado() {
        let mut invoice = test_invoice();
        invoice.vendor_tax_id = None;
        invoice.invoice_number = None;
        let row = compute_row(&invoice);

        assert!(row.estado.contains("Falta RNC/Cédula"));
        assert!(row.estado.contains("Falta NCF"));
    }

    #[test]
    fn test_retention_without_payment_date_flagged() {
        let mut invoice = test_invoice();
        invoice.isr_retention_amount = Some(100.0);
        invoice.isr_retention_type = Some("2".to_string());
        invoice.payment_date = None;
        let row = compute_row(&invoice);

        assert!(row.estado.contains("Falta fecha de pago para retenciones"));
    }

    #[test]
    fn test_base_falls_back_to_line_items() {
        let mut invoice = test_invoice();
        invoice.total_amount = None;
        invoice.line_items = Json(vec![
            LineItem {
                description: "Item A".to_string(),
                quantity: 2.0,
                unit_price: 100.0,
                subtotal: 200.0,
            },
            LineItem {
                description: "Item B".to_string(),
                quantity: 1.0,
                unit_price: 50.0,
                subtotal: 50.0,
            },
        ]);

        assert_eq!(taxable_base(&invoice), 250.0);
    }

    #[test]
    fn test_report_period_uses_latest_invoice() {
        let mut a = test_invoice();
        a.invoice_date = NaiveDate::from_ymd_opt(2025, 2, 10);
        let mut b = test_invoice();
        b.invoice_date = NaiveDate::from_ymd_opt(2025, 3, 5);

        assert_eq!(report_period(&[a, b]), "202503");
    }

    #[test]
    fn test_raw_extraction_fills_template_columns() {
        let mut invoice = test_invoice();
        invoice.raw_extracted_data = Some(json!({
            "ncf_modified": "B0400000055",
            "isc_amount": 25.0,
            "other_taxes": "10.50",
            "legal_tip": 100.0,
            "itbis_percibido": 5.0,
            "isr_percibido": 3.0,
            "itbis_proporcionalidad": 12.0,
        }));
        let row = compute_row(&invoice);

        assert_eq!(row.ncf_modificado, "B0400000055");
        assert_eq!(row.isc, 25.0);
        assert_eq!(row.otros_impuestos, 10.5);
        assert_eq!(row.propina_legal, 100.0);
        assert_eq!(row.itbis_percibido, 5.0);
        assert_eq!(row.isr_percibido, 3.0);
        assert_eq!(row.itbis_proporcionalidad, 12.0);
    }

    #[test]
    fn test_explicit_goods_amount_from_raw_splits_base() {
        let mut invoice = test_invoice();
        invoice.raw_extracted_data = Some(json!({ "goods_amount": 600.0 }));
        let row = compute_row(&invoice);

        assert_eq!(row.monto_bienes, 600.0);
        assert_eq!(row.monto_servicios, 400.0);
        assert_eq!(row.total_monto_facturado, 1000.0);
    }

    #[test]
    fn test_render_structure() {
        let invoice = test_invoice();
        let output = render(&[invoice], "131-11111-1");

        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 3); // header, columns, one row
        assert!(lines[0].starts_with("606|131111111|202503|1"));
        assert!(lines[2].contains("|B0100000123|"));
        assert!(lines[2].ends_with("|OK"));
        // every row carries the full template width
        assert_eq!(lines[1].split('|').count(), 24);
        assert_eq!(lines[2].split('|').count(), 24);
    }
}
