/// Prompt construction for extraction and chat.
/// Field names in the extraction schema must stay in sync with
/// [`crate::normalize::RawExtraction`].

/// System prompt for invoice extraction. Instructs the model to answer
/// with a single JSON object and nothing else.
pub const EXTRACTION_SYSTEM_PROMPT: &str = "\
Eres un asistente contable especializado en facturas de República Dominicana. \
Extrae los datos de la factura y responde ÚNICAMENTE con un objeto JSON, sin \
texto adicional ni bloques de código.

El objeto JSON debe tener estos campos (usa null cuando el dato no aparezca):
{
  \"vendor_name\": \"nombre del proveedor o emisor\",
  \"vendor_tax_id\": \"RNC o cédula del proveedor, solo el número\",
  \"vendor_country\": \"país del proveedor en código ISO alfa-3 (DOM, USA, MEX...)\",
  \"vendor_fiscal_address\": \"dirección fiscal del proveedor\",
  \"invoice_number\": \"NCF o número de comprobante fiscal\",
  \"invoice_date\": \"fecha de emisión en formato YYYY-MM-DD\",
  \"payment_date\": \"fecha de pago en formato YYYY-MM-DD\",
  \"total_amount\": monto total como número,
  \"tax_amount\": ITBIS facturado como número,
  \"currency\": \"código de moneda (DOP, USD, EUR)\",
  \"transaction_type\": \"expense o income\",
  \"category\": \"categoría del gasto en minúsculas\",
  \"description\": \"descripción breve de la compra\",
  \"goods_services_type\": \"código DGII 01-11 de bienes y servicios\",
  \"isr_retention_type\": \"tipo de retención ISR 1-9 si aplica\",
  \"isr_retention_amount\": monto de retención ISR si aplica,
  \"itbis_retained\": ITBIS retenido si aplica,
  \"payment_method\": \"forma de pago: efectivo, cheque, tarjeta, crédito...\",
  \"line_items\": [{\"description\": \"...\", \"quantity\": 1, \"unit_price\": 0.0, \"subtotal\": 0.0}],
  \"confidence_score\": confianza de la extracción entre 0.0 y 1.0
}

Reglas:
- El NCF dominicano empieza con B seguido de 10 dígitos, o E seguido de 12.
- No inventes valores. Si un campo no es legible, usa null.
- Los montos son números sin símbolos de moneda ni separadores de miles.";

/// User prompt paired with an invoice image.
pub const EXTRACTION_IMAGE_PROMPT: &str =
    "Extrae los datos de esta factura y responde con el objeto JSON.";

/// Builds the user prompt for text extracted from a PDF.
pub fn extraction_text_prompt(document_text: &str) -> String {
    format!(
        "Extrae los datos de la siguiente factura y responde con el objeto JSON.\n\n\
         --- TEXTO DE LA FACTURA ---\n{}",
        document_text,
    )
}

/// System prompt for the financial assistant chat. The caller appends a
/// summary of the organization's recent numbers as context.
pub fn chat_system_prompt(financial_context: &str) -> String {
    format!(
        "Eres el CFO virtual de una pequeña empresa dominicana. Respondes \
         preguntas sobre sus gastos y facturas de forma clara y breve, en el \
         idioma en que te pregunten. Usa únicamente los datos del contexto; \
         si no tienes el dato, dilo. No inventes cifras.\n\n\
         --- CONTEXTO FINANCIERO ---\n{}",
        financial_context,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_prompt_covers_schema_fields() {
        for field in [
            "vendor_name",
            "vendor_tax_id",
            "invoice_number",
            "invoice_date",
            "total_amount",
            "tax_amount",
            "goods_services_type",
            "line_items",
            "confidence_score",
        ] {
            assert!(
                EXTRACTION_SYSTEM_PROMPT.contains(field),
                "missing field {}",
                field
            );
        }
    }

    #[test]
    fn test_text_prompt_embeds_document() {
        let prompt = extraction_text_prompt("FACTURA 001 TOTAL RD$500");
        assert!(prompt.contains("FACTURA 001 TOTAL RD$500"));
    }

    #[test]
    fn test_chat_prompt_embeds_context() {
        let prompt = chat_system_prompt("Gastos de marzo: RD$45,000");
        assert!(prompt.contains("Gastos de marzo"));
    }
}
