/// Dominican fiscal rules
///
/// NCF validation, goods/services classification, ISR retention and payment
/// method codes, and vendor country detection. These rules mirror what the
/// DGII expects on the 606 report, so getting them right here keeps bad data
/// out of the export entirely.
use once_cell::sync::Lazy;
use regex::Regex;

/// NCF serie B: "B" + 10 digits (tipo 2 digits + secuencia 8 digits)
static NCF_B: Lazy<Regex> = Lazy::new(|| Regex::new(r"^B\d{10}$").expect("valid regex"));

/// e-CF serie E: "E" + 12 digits
static NCF_E: Lazy<Regex> = Lazy::new(|| Regex::new(r"^E\d{12}$").expect("valid regex"));

/// Strips separators and uppercases an NCF candidate.
pub fn normalize_ncf(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Whether a normalized NCF matches a known DGII format.
pub fn is_valid_ncf(ncf: &str) -> bool {
    NCF_B.is_match(ncf) || NCF_E.is_match(ncf)
}

/// The two-digit tipo embedded in a serie B NCF, e.g. "01" for crédito
/// fiscal. None for e-CF or malformed values.
pub fn ncf_tipo(ncf: &str) -> Option<&str> {
    if NCF_B.is_match(ncf) {
        Some(&ncf[1..3])
    } else {
        None
    }
}

/// Normalizes and validates an NCF, producing audit warnings for anything
/// an accountant would have to fix.
pub fn process_ncf(raw: &str, warnings: &mut Vec<String>) -> Option<String> {
    let ncf = normalize_ncf(raw);
    if ncf.is_empty() {
        return None;
    }

    if !is_valid_ncf(&ncf) {
        warnings.push(format!("NCF con formato no reconocido: {}", ncf));
    } else if ncf_tipo(&ncf) == Some("12") {
        // Tipo 12 is registro único de ingresos, a sales-side receipt
        warnings.push("NCF tipo 12 no es válido para el reporte 606".to_string());
    }

    Some(ncf)
}

/// DGII goods/services purchase type codes (01 through 11)
pub const GOODS_SERVICES_TYPES: &[(&str, &str)] = &[
    ("01", "Gastos de personal"),
    ("02", "Gastos por trabajos, suministros y servicios"),
    ("03", "Arrendamientos"),
    ("04", "Gastos de activos fijos"),
    ("05", "Gastos de representación"),
    ("06", "Otras deducciones admitidas"),
    ("07", "Gastos financieros"),
    ("08", "Gastos extraordinarios"),
    ("09", "Compras y gastos que forman parte del costo de venta"),
    ("10", "Adquisiciones de activos"),
    ("11", "Gastos de seguros"),
];

/// Normalizes a goods/services type to a zero-padded two-digit code,
/// or None when out of range.
pub fn normalize_goods_services_type(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let n: u32 = digits.parse().ok()?;

    if (1..=11).contains(&n) {
        Some(format!("{:02}", n))
    } else {
        None
    }
}

/// Infers a goods/services type from category or description keywords.
/// Falls back to "02" (supplies and services), the most common code.
pub fn infer_goods_services_type(text: &str) -> String {
    let lower = text.to_lowercase();

    let rules: &[(&[&str], &str)] = &[
        (&["nomina", "nómina", "salario", "sueldo"], "01"),
        (&["arrend", "alquiler", "renta de local"], "03"),
        (&["seguro", "poliza", "póliza"], "11"),
        (&["financier", "interes", "interés", "banco", "comision bancaria"], "07"),
        (&["representacion", "representación"], "05"),
        (&["activo fijo", "maquinaria", "equipo"], "10"),
        (&["inventario", "mercancia", "mercancía", "costo de venta"], "09"),
        (&["servicio", "consultoria", "consultoría", "mantenimiento", "suministro", "honorario"], "02"),
    ];

    for (keywords, code) in rules {
        if keywords.iter().any(|kw| lower.contains(kw)) {
            return (*code).to_string();
        }
    }

    "02".to_string()
}

/// Normalizes an ISR retention type (codes 1 through 9).
pub fn normalize_isr_retention_type(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let n: u32 = digits.parse().ok()?;

    if (1..=9).contains(&n) {
        Some(n.to_string())
    } else {
        None
    }
}

/// Maps a payment method to DGII codes 1-7. Accepts either a digit or a
/// Spanish keyword from the invoice text.
pub fn normalize_payment_method(raw: &str) -> Option<String> {
    let trimmed = raw.trim();

    if let Ok(n) = trimmed.parse::<u32>() {
        return if (1..=7).contains(&n) {
            Some(n.to_string())
        } else {
            None
        };
    }

    let lower = trimmed.to_lowercase();
    let code = if lower.contains("efectivo") {
        "1"
    } else if lower.contains("cheque") || lower.contains("transfer") || lower.contains("deposito")
        || lower.contains("depósito")
    {
        "2"
    } else if lower.contains("tarjeta") {
        "3"
    } else if lower.contains("credito") || lower.contains("crédito") {
        "4"
    } else if lower.contains("permuta") {
        "5"
    } else if lower.contains("nota de credito") || lower.contains("nota de crédito") {
        "6"
    } else if lower.contains("mixto") {
        "7"
    } else {
        return None;
    };

    Some(code.to_string())
}

/// Tax ID patterns per country, tried in order
static TAX_ID_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        // Dominican RNC (9 digits) or cédula (XXX-XXXXXXX-X)
        ("DOM", Regex::new(r"^\d{9}$|^\d{3}-\d{7}-\d{1}$").expect("valid regex")),
        // Mexican RFC
        (
            "MEX",
            Regex::new(r"^[A-ZÑ&]{3,4}\d{6}[A-Z0-9]{3}$").expect("valid regex"),
        ),
        // US EIN
        ("USA", Regex::new(r"^\d{2}-\d{7}$").expect("valid regex")),
        // Colombian NIT
        ("COL", Regex::new(r"^\d{9,10}$").expect("valid regex")),
        // Spanish NIF/CIF
        (
            "ESP",
            Regex::new(r"^[A-Z]\d{7}[A-Z0-9]$|^\d{8}[A-Z]$").expect("valid regex"),
        ),
        // Argentine CUIT
        ("ARG", Regex::new(r"^\d{2}-\d{8}-\d{1}$").expect("valid regex")),
    ]
});

/// ISO 3166-1 alpha-3 codes we accept from the extraction model
const KNOWN_COUNTRIES: &[&str] = &[
    "DOM", "USA", "MEX", "COL", "ESP", "ARG", "CHL", "PER", "PAN", "CRI", "GTM", "HND", "NIC",
    "SLV", "PRI", "VEN", "ECU", "URY", "PRY", "BOL", "BRA", "CAN", "FRA", "DEU", "GBR", "ITA",
    "CHN", "JPN",
];

/// Currencies that imply a single country
fn country_for_currency(currency: &str) -> Option<&'static str> {
    match currency {
        "DOP" => Some("DOM"),
        "USD" => Some("USA"),
        "MXN" => Some("MEX"),
        "COP" => Some("COL"),
        "ARS" => Some("ARG"),
        "CLP" => Some("CHL"),
        "PEN" => Some("PER"),
        "GTQ" => Some("GTM"),
        "CRC" => Some("CRI"),
        "HNL" => Some("HND"),
        "BRL" => Some("BRA"),
        "GBP" => Some("GBR"),
        "JPY" => Some("JPN"),
        // EUR is shared by many countries, so it cannot decide
        _ => None,
    }
}

/// Result of vendor country detection
#[derive(Debug, Clone, PartialEq)]
pub struct CountryDetection {
    pub country: Option<String>,
    pub confidence: f64,
    pub method: String,
}

/// Detects the vendor country through a ladder of signals:
///
/// 1. A valid alpha-3 code from the extraction model (confidence 1.0)
/// 2. The tax ID shape (0.8, dropped to 0.7 with a warning when the
///    currency points elsewhere)
/// 3. A currency that implies a single country (0.6)
///
/// Anything else is undetected with confidence 0.0.
pub fn detect_country(
    ai_country: Option<&str>,
    tax_id: Option<&str>,
    currency: Option<&str>,
    warnings: &mut Vec<String>,
) -> CountryDetection {
    if let Some(code) = ai_country {
        let upper = code.trim().to_ascii_uppercase();
        if KNOWN_COUNTRIES.contains(&upper.as_str()) {
            return CountryDetection {
                country: Some(upper),
                confidence: 1.0,
                method: "ai_extraction".to_string(),
            };
        }
    }

    if let Some(tax_id) = tax_id {
        let trimmed = tax_id.trim();
        for (country, pattern) in TAX_ID_PATTERNS.iter() {
            if pattern.is_match(trimmed) {
                let currency_country = currency.and_then(country_for_currency);
                let conflicting = matches!(currency_country, Some(c) if c != *country);

                if conflicting {
                    warnings.push(format!(
                        "El RNC/Tax ID sugiere {} pero la moneda sugiere {}",
                        country,
                        currency_country.unwrap_or("desconocido"),
                    ));
                }

                return CountryDetection {
                    country: Some((*country).to_string()),
                    confidence: if conflicting { 0.7 } else { 0.8 },
                    method: "tax_id_pattern".to_string(),
                };
            }
        }
    }

    if let Some(currency) = currency {
        if let Some(country) = country_for_currency(currency) {
            return CountryDetection {
                country: Some(country.to_string()),
                confidence: 0.6,
                method: "currency_mapping".to_string(),
            };
        }
    }

    CountryDetection {
        country: None,
        confidence: 0.0,
        method: "undetected".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_ncf() {
        assert_eq!(normalize_ncf("b01-0000 0123"), "B0100000123");
        assert_eq!(normalize_ncf(" e00000 0000123 "), "E000000000123");
        assert_eq!(normalize_ncf("---"), "");
    }

    #[test]
    fn test_is_valid_ncf() {
        assert!(is_valid_ncf("B0100000123"));
        assert!(is_valid_ncf("E000000000123"));
        assert!(!is_valid_ncf("B010000012")); // 9 digits
        assert!(!is_valid_ncf("A0100000123")); // wrong serie
        assert!(!is_valid_ncf("E0000000123")); // e-CF needs 12 digits
    }

    #[test]
    fn test_ncf_tipo_12_warned() {
        let mut warnings = Vec::new();
        let ncf = process_ncf("B1200000456", &mut warnings).unwrap();

        assert_eq!(ncf, "B1200000456");
        assert_eq!(ncf_tipo(&ncf), Some("12"));
        assert!(warnings[0].contains("no es válido para el reporte 606"));
    }

    #[test]
    fn test_process_ncf_unknown_format_warned() {
        let mut warnings = Vec::new();
        let ncf = process_ncf("XYZ123", &mut warnings).unwrap();

        assert_eq!(ncf, "XYZ123");
        assert!(warnings[0].contains("formato no reconocido"));
    }

    #[test]
    fn test_normalize_goods_services_type() {
        assert_eq!(normalize_goods_services_type("2"), Some("02".to_string()));
        assert_eq!(normalize_goods_services_type("09"), Some("09".to_string()));
        assert_eq!(normalize_goods_services_type("11"), Some("11".to_string()));
        assert_eq!(normalize_goods_services_type("12"), None);
        assert_eq!(normalize_goods_services_type("0"), None);
        assert_eq!(normalize_goods_services_type("abc"), None);
    }

    #[test]
    fn test_infer_goods_services_type() {
        assert_eq!(infer_goods_services_type("Pago de nomina marzo"), "01");
        assert_eq!(infer_goods_services_type("Alquiler de oficina"), "03");
        assert_eq!(infer_goods_services_type("Póliza de seguro medico"), "11");
        assert_eq!(infer_goods_services_type("Intereses banco popular"), "07");
        assert_eq!(infer_goods_services_type("Compra de maquinaria"), "10");
        assert_eq!(infer_goods_services_type("Mercancía para reventa"), "09");
        assert_eq!(infer_goods_services_type("Servicio de consultoría"), "02");
        assert_eq!(infer_goods_services_type("algo sin clasificar"), "02");
    }

    #[test]
    fn test_normalize_payment_method() {
        assert_eq!(normalize_payment_method("3"), Some("3".to_string()));
        assert_eq!(normalize_payment_method("9"), None);
        assert_eq!(normalize_payment_method("Efectivo"), Some("1".to_string()));
        assert_eq!(
            normalize_payment_method("transferencia bancaria"),
            Some("2".to_string())
        );
        assert_eq!(
            normalize_payment_method("tarjeta de credito"),
            Some("3".to_string())
        );
        assert_eq!(normalize_payment_method("a crédito"), Some("4".to_string()));
        assert_eq!(normalize_payment_method("desconocido"), None);
    }

    #[test]
    fn test_detect_country_from_ai() {
        let mut warnings = Vec::new();
        let detection = detect_country(Some("dom"), None, None, &mut warnings);

        assert_eq!(detection.country.as_deref(), Some("DOM"));
        assert_eq!(detection.confidence, 1.0);
        assert_eq!(detection.method, "ai_extraction");
    }

    #[test]
    fn test_detect_country_from_tax_id() {
        let mut warnings = Vec::new();
        let detection = detect_country(None, Some("101000001"), Some("DOP"), &mut warnings);

        assert_eq!(detection.country.as_deref(), Some("DOM"));
        assert_eq!(detection.confidence, 0.8);
        assert_eq!(detection.method, "tax_id_pattern");
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_detect_country_tax_id_currency_conflict() {
        let mut warnings = Vec::new();
        // DOM-shaped tax ID but Mexican pesos
        let detection = detect_country(None, Some("101000001"), Some("MXN"), &mut warnings);

        assert_eq!(detection.country.as_deref(), Some("DOM"));
        assert_eq!(detection.confidence, 0.7);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_detect_country_from_currency() {
        let mut warnings = Vec::new();
        let detection = detect_country(None, None, Some("DOP"), &mut warnings);

        assert_eq!(detection.country.as_deref(), Some("DOM"));
        assert_eq!(detection.confidence, 0.6);
        assert_eq!(detection.method, "currency_mapping");
    }

    #[test]
    fn test_detect_country_eur_is_ambiguous() {
        let mut warnings = Vec::new();
        let detection = detect_country(None, None, Some("EUR"), &mut warnings);

        assert!(detection.country.is_none());
        assert_eq!(detection.confidence, 0.0);
        assert_eq!(detection.method, "undetected");
    }

    #[test]
    fn test_detect_country_invalid_ai_falls_through() {
        let mut warnings = Vec::new();
        let detection = detect_country(Some("XX"), Some("12-3456789"), None, &mut warnings);

        assert_eq!(detection.country.as_deref(), Some("USA"));
        assert_eq!(detection.method, "tax_id_pattern");
    }
}
