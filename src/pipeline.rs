//! parse → validate → load → embed → respond

use crate::embed::{BackendLoader, LoadOptions, ModelChoice};
use crate::error::{EmbedError, Result};
use crate::protocol::{EmbeddingRequest, EmbeddingResponse};
use std::time::Instant;
use tracing::{debug, info};

/// Run one request document through the model named `model`.
///
/// Validation happens before the backend is touched, so bad input never
/// pays for a model load.
pub fn embed_request(
    input: &str,
    model: &str,
    loader: &dyn BackendLoader,
    opts: &LoadOptions,
) -> Result<EmbeddingResponse> {
    let texts = EmbeddingRequest::parse(input)?.into_texts()?;
    debug!(count = texts.len(), "request parsed");

    let choice = ModelChoice::parse(model)?;
    let mut embedder = loader.load(choice, opts)?;

    let start = Instant::now();
    let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
    let embeddings = embedder.embed_texts(&refs)?;
    info!(
        model = choice.id(),
        count = embeddings.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "embedded texts"
    );

    let dimension = embeddings
        .first()
        .map(|v| v.len())
        .ok_or_else(|| EmbedError::Inference("no embedding returned".to_string()))?;

    Ok(EmbeddingResponse {
        embeddings,
        model: model.to_string(),
        dimension,
    })
}
