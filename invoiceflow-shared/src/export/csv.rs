/// CSV export layouts
///
/// One generic layout plus the import formats of the accounting packages
/// customers actually use. Dates follow whatever each package expects;
/// QuickBooks wants MM/DD/YYYY with a due date 30 days out, the European
/// packages take ISO dates.
use chrono::Duration;

use super::ExportError;
use crate::models::Invoice;

fn vendor_or_default(invoice: &Invoice) -> &str {
    invoice
        .vendor_name
        .as_deref()
        .unwrap_or("Proveedor no identificado")
}

fn finish(writer: csv::Writer<Vec<u8>>) -> Result<String, ExportError> {
    let bytes = writer
        .into_inner()
        .map_err(|e| ExportError::Csv(e.into_error().into()))?;
    Ok(String::from_utf8(bytes)?)
}

/// Generic CSV with one row per invoice.
pub fn render_generic(invoices: &[Invoice]) -> Result<String, ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    writer.write_record([
        "invoice_id",
        "vendor",
        "vendor_tax_id",
        "ncf",
        "invoice_date",
        "total_amount",
        "tax_amount",
        "currency",
        "category",
        "transaction_type",
        "description",
    ])?;

    for invoice in invoices {
        writer.write_record([
            invoice.id.to_string(),
            vendor_or_default(invoice).to_string(),
            invoice.vendor_tax_id.clone().unwrap_or_default(),
            invoice.invoice_number.clone().unwrap_or_default(),
            invoice
                .invoice_date
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            format!("{:.2}", invoice.total_amount.unwrap_or(0.0)),
            format!("{:.2}", invoice.tax_amount.unwrap_or(0.0)),
            invoice.currency.clone(),
            invoice.category.clone().unwrap_or_default(),
            invoice.transaction_type.clone(),
            invoice.description.clone().unwrap_or_default(),
        ])?;
    }

    finish(writer)
}

/// QuickBooks Bills import layout.
pub fn render_quickbooks(invoices: &[Invoice]) -> Result<String, ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    writer.write_record([
        "*BillNo",
        "*Supplier",
        "*BillDate",
        "*DueDate",
        "Memo",
        "*Account",
        "LineDescription",
        "*LineAmount",
        "LineTaxAmount",
        "Currency",
    ])?;

    for invoice in invoices {
        let bill_date = invoice
            .invoice_date
            .map(|d| d.format("%m/%d/%Y").to_string())
            .unwrap_or_default();
        let due_date = invoice
            .invoice_date
            .map(|d| (d + Duration::days(30)).format("%m/%d/%Y").to_string())
            .unwrap_or_default();

        writer.write_record([
            invoice.invoice_number.clone().unwrap_or_default(),
            vendor_or_default(invoice).to_string(),
            bill_date,
            due_date,
            invoice.description.clone().unwrap_or_default(),
            "Accounts Payable".to_string(),
            invoice.category.clone().unwrap_or_default(),
            format!("{:.2}", invoice.total_amount.unwrap_or(0.0)),
            format!("{:.2}", invoice.tax_amount.unwrap_or(0.0)),
            invoice.currency.clone(),
        ])?;
    }

    finish(writer)
}

/// Xero Bills import layout.
pub fn render_xero(invoices: &[Invoice]) -> Result<String, ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    writer.write_record([
        "*ContactName",
        "*InvoiceNumber",
        "*InvoiceDate",
        "*DueDate",
        "Description",
        "*Quantity",
        "*UnitAmount",
        "*AccountCode",
        "TaxAmount",
        "Currency",
    ])?;

    for invoice in invoices {
        let date = invoice
            .invoice_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        let due = invoice
            .invoice_date
            .map(|d| (d + Duration::days(30)).format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        let base = invoice.total_amount.unwrap_or(0.0) - invoice.tax_amount.unwrap_or(0.0);

        writer.write_record([
            vendor_or_default(invoice).to_string(),
            invoice.invoice_number.clone().unwrap_or_default(),
            date,
            due,
            invoice.category.clone().unwrap_or_default(),
            "1".to_string(),
            format!("{:.2}", base.max(0.0)),
            "400".to_string(),
            format!("{:.2}", invoice.tax_amount.unwrap_or(0.0)),
            invoice.currency.clone(),
        ])?;
    }

    finish(writer)
}

/// Odoo vendor bill import layout (`move_type` in_invoice).
pub fn render_odoo(invoices: &[Invoice]) -> Result<String, ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    writer.write_record([
        "partner_id/name",
        "ref",
        "invoice_date",
        "move_type",
        "amount_untaxed",
        "amount_tax",
        "amount_total",
        "currency_id/name",
    ])?;

    for invoice in invoices {
        let total = invoice.total_amount.unwrap_or(0.0);
        let tax = invoice.tax_amount.unwrap_or(0.0);

        writer.write_record([
            vendor_or_default(invoice).to_string(),
            invoice.invoice_number.clone().unwrap_or_default(),
            invoice
                .invoice_date
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            "in_invoice".to_string(),
            format!("{:.2}", (total - tax).max(0.0)),
            format!("{:.2}", tax),
            format!("{:.2}", total),
            invoice.currency.clone(),
        ])?;
    }

    finish(writer)
}

/// Contaplus journal entry layout. Each invoice becomes three lines: the
/// expense base debited to 60000000, the tax debited to 47200000, and the
/// total credited to the supplier account 40000000.
pub fn render_contaplus(invoices: &[Invoice]) -> Result<String, ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    writer.write_record(["asiento", "fecha", "subcuenta", "concepto", "debe", "haber"])?;

    for (i, invoice) in invoices.iter().enumerate() {
        let asiento = (i + 1).to_string();
        let fecha = invoice
            .invoice_date
            .map(|d| d.format("%d/%m/%Y").to_string())
            .unwrap_or_default();
        let concepto = format!(
            "{} {}",
            vendor_or_default(invoice),
            invoice.invoice_number.as_deref().unwrap_or("")
        )
        .trim()
        .to_string();

        let total = invoice.total_amount.unwrap_or(0.0);
        let tax = invoice.tax_amount.unwrap_or(0.0);
        let base = (total - tax).max(0.0);

        writer.write_record([
            asiento.clone(),
            fecha.clone(),
            "60000000".to_string(),
            concepto.clone(),
            format!("{:.2}", base),
            "0.00".to_string(),
        ])?;
        writer.write_record([
            asiento.clone(),
            fecha.clone(),
            "47200000".to_string(),
            concepto.clone(),
            format!("{:.2}", tax),
            "0.00".to_string(),
        ])?;
        writer.write_record([
            asiento,
            fecha,
            "40000000".to_string(),
            concepto,
            "0.00".to_string(),
            format!("{:.2}", total),
        ])?;
    }

    finish(writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::test_fixtures::sample_invoice;

    #[test]
    fn test_generic_csv_headers_and_rows() {
        let output = render_generic(&[sample_invoice()]).unwrap();
        let lines: Vec<&str> = output.lines().collect();

        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("invoice_id,vendor,"));
        assert!(lines[1].contains("Ferretería Central"));
        assert!(lines[1].contains("B0100000123"));
    }

    #[test]
    fn test_generic_csv_default_vendor() {
        let mut invoice = sample_invoice();
        invoice.vendor_name = None;
        let output = render_generic(&[invoice]).unwrap();

        assert!(output.contains("Proveedor no identificado"));
    }

    #[test]
    fn test_quickbooks_dates() {
        let output = render_quickbooks(&[sample_invoice()]).unwrap();

        // Invoice date 2025-03-15, due 30 days later
        assert!(output.contains("03/15/2025"));
        assert!(output.contains("04/14/2025"));
    }

    #[test]
    fn test_xero_unit_amount_is_base() {
        let output = render_xero(&[sample_invoice()]).unwrap();
        // total 1180 minus tax 180
        assert!(output.contains("1000.00"));
    }

    #[test]
    fn test_odoo_move_type() {
        let output = render_odoo(&[sample_invoice()]).unwrap();
        assert!(output.contains("in_invoice"));
        assert!(output.contains("1180.00"));
    }

    #[test]
    fn test_contaplus_three_lines_per_invoice() {
        let output = render_contaplus(&[sample_invoice()]).unwrap();
        let lines: Vec<&str> = output.lines().collect();

        assert_eq!(lines.len(), 4); // header + 3 journal lines
        assert!(lines[1].contains("60000000"));
        assert!(lines[1].contains("1000.00"));
        assert!(lines[2].contains("47200000"));
        assert!(lines[2].contains("180.00"));
        assert!(lines[3].contains("40000000"));
        assert!(lines[3].contains("1180.00"));
    }
}
