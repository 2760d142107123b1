/// Extraction orchestration
///
/// Runs one document through the model and normalization, timing the call
/// and pricing it. Budget checks happen before this is invoked; persisting
/// the result happens after.
use std::time::Instant;

use tracing::info;

use crate::cost;
use crate::media::{self, MediaError, MediaKind};
use crate::normalize::{self, NormalizeError, NormalizedInvoice};
use crate::openai::{OpenAiClient, OpenAiError};

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    OpenAi(#[from] OpenAiError),

    #[error(transparent)]
    Normalize(#[from] NormalizeError),
}

/// A finished extraction with its cost accounting.
#[derive(Debug)]
pub struct ExtractionOutcome {
    pub invoice: NormalizedInvoice,
    pub model: String,
    pub tokens_used: u64,
    pub cost_usd: f64,
    pub processing_secs: f64,
}

pub struct Extractor {
    client: OpenAiClient,
    model: String,
}

impl Extractor {
    pub fn new(client: OpenAiClient, model: String) -> Self {
        Self { client, model }
    }

    /// Extracts invoice data from raw file bytes. Images are optimized and
    /// sent through vision; PDFs have their text layer extracted and go
    /// through the text path.
    pub async fn extract(
        &self,
        filename: &str,
        bytes: &[u8],
    ) -> Result<ExtractionOutcome, ExtractError> {
        let kind = media::classify(filename)?;
        let started = Instant::now();

        let completion = match kind {
            MediaKind::Image => {
                let encoded = media::optimize_image_base64(bytes)?;
                self.client.extract_from_image(&self.model, &encoded).await?
            }
            MediaKind::Pdf => {
                let text = media::extract_pdf_text(bytes)?;
                self.client.extract_from_text(&self.model, &text).await?
            }
        };

        let processing_secs = started.elapsed().as_secs_f64();
        let tokens_used = completion.total_tokens();
        let cost_usd = cost::estimate_cost_usd(
            &self.model,
            completion.prompt_tokens,
            completion.completion_tokens,
        );

        let invoice = normalize::normalize_response(&completion.content)?;

        info!(
            filename,
            model = %self.model,
            tokens_used,
            cost_usd,
            confidence = invoice.confidence_score,
            "extraction completed"
        );

        Ok(ExtractionOutcome {
            invoice,
            model: self.model.clone(),
            tokens_used,
            cost_usd,
            processing_secs,
        })
    }
}
