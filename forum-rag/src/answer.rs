//! Grounded answer generation from retrieved posts.

use tracing::{error, info};

use crate::document::QueryResult;
use crate::error::{RagError, Result};
use crate::generation::{GenerationRequest, TextGenerator};

/// Separator written after every grounding line.
pub const CONTEXT_SEPARATOR: &str = "  \n";

const ANSWER_TEMPERATURE: f32 = 0.1;
const ANSWER_MAX_TOKENS: u32 = 2000;

/// Format query results as a grounding block, highest similarity first.
///
/// Each result becomes `id:<id>, content:<content>, answer:<comments>`
/// followed by [`CONTEXT_SEPARATOR`]. An empty slice yields an empty string.
pub fn assemble_context(results: &[QueryResult]) -> String {
    results
        .iter()
        .map(|r| {
            format!(
                "id:{}, content:{}, answer:{}{CONTEXT_SEPARATOR}",
                r.document.id, r.document.content, r.document.comments
            )
        })
        .collect()
}

/// The fixed instructional preamble wrapped around a grounding block.
pub fn answer_instructions(context: &str) -> String {
    format!(
        "You should generate an answer based on the \"### Grounding data\" message provided \
         below, rather than using any knowledge you have about the user's question.\n\n\
         ### Grounding data\n{context}\
         ### Notes\nCombine the grounding data entries to produce the best possible answer.\n\
         Also output the ids of the entries you used.\n"
    )
}

/// Ask the generator to answer `query` from the grounding `context`.
///
/// The reply is returned verbatim; it is never parsed.
///
/// # Errors
///
/// Returns [`RagError::GenerationError`] if the generator call fails.
pub async fn generate_answer(
    query: &str,
    context: &str,
    generator: &dyn TextGenerator,
) -> Result<String> {
    let request = GenerationRequest::new(answer_instructions(context), query)
        .with_temperature(ANSWER_TEMPERATURE)
        .with_max_tokens(ANSWER_MAX_TOKENS);

    let answer = generator.generate(&request).await.map_err(|e| {
        error!(generator = generator.name(), error = %e, "answer generation failed");
        match e {
            e @ RagError::GenerationError { .. } => e,
            other => RagError::GenerationError {
                provider: generator.name().to_string(),
                message: other.to_string(),
            },
        }
    })?;

    info!(answer_len = answer.len(), "answer generated");
    Ok(answer)
}
