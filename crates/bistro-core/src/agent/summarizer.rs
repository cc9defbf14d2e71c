//! Summaries of history evicted from the prompt window.
//!
//! Evicted user and assistant turns are rendered as a transcript and split
//! into fixed-size chunks; only the first chunk is summarized and later
//! history is not. Once eviction has produced more than one chunk of text
//! the summarizer input stops changing, so the summary and the cached
//! prompt prefix stay stable.
//!
//! The SHA-256 digest of the summarized chunk is stored next to the
//! summary. A matching digest reuses the stored text without calling the
//! summarizer again.

use std::future::Future;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use text_splitter::TextSplitter;

use bistro_observe::genai_attrs::OP_SUMMARIZE_CONTEXT;
use bistro_types::config::SummarizerKind;
use bistro_types::conversation::ConversationSummary;
use bistro_types::llm::{Message, MessageRole, SystemBlock};
use bistro_types::turn::{Role, Turn};

use crate::llm::invoker::{InvokeError, ModelInvoker, Prompt};

/// Header of every extractive summary.
pub const SUMMARY_HEADER: &str = "Previous session summary:";

const SUMMARY_SYSTEM_PROMPT: &str = r#"Condense the following restaurant-assistant conversation segment. Keep:
1. Reservation details (dates, times, party sizes, confirmation ids)
2. Names and contact details the guest gave
3. Preferences, allergies and open requests

Keep it under 200 words. Write in third person (e.g., "The guest asked about...")."#;

/// Condenses a transcript chunk into summary text.
///
/// Implementations must be deterministic for equal input.
pub trait Summarizer: Send + Sync {
    fn summarize(&self, transcript: &str) -> impl Future<Output = Result<String, InvokeError>> + Send;
}

/// Extractive summarizer: the header followed by the transcript chunk.
#[derive(Debug, Clone, Copy, Default)]
pub struct DigestSummarizer;

impl Summarizer for DigestSummarizer {
    async fn summarize(&self, transcript: &str) -> Result<String, InvokeError> {
        Ok(format!("{SUMMARY_HEADER}\n{transcript}"))
    }
}

/// Model-backed summarizer, called at temperature 0.
pub struct LlmSummarizer {
    invoker: Arc<ModelInvoker>,
}

impl LlmSummarizer {
    pub fn new(invoker: Arc<ModelInvoker>) -> Self {
        Self { invoker }
    }
}

impl Summarizer for LlmSummarizer {
    #[tracing::instrument(
        name = "summarize_history",
        skip_all,
        fields(gen_ai.operation.name = OP_SUMMARIZE_CONTEXT, chars = transcript.len())
    )]
    async fn summarize(&self, transcript: &str) -> Result<String, InvokeError> {
        let prompt = Prompt {
            system: vec![SystemBlock {
                text: SUMMARY_SYSTEM_PROMPT.to_string(),
                cache_breakpoint: false,
            }],
            messages: vec![Message::text(
                MessageRole::User,
                format!("Please summarize this conversation:\n\n<conversation>\n{transcript}\n</conversation>"),
            )],
            tools: Vec::new(),
            temperature: Some(0.0),
        };
        let reply = self.invoker.complete(&prompt).await?;
        Ok(format!("{SUMMARY_HEADER}\n{}", reply.text.trim()))
    }
}

/// Summarizer picked from configuration at startup.
pub enum AnySummarizer {
    Digest(DigestSummarizer),
    Model(LlmSummarizer),
}

impl AnySummarizer {
    pub fn from_config(kind: SummarizerKind, invoker: &Arc<ModelInvoker>) -> Self {
        match kind {
            SummarizerKind::Digest => AnySummarizer::Digest(DigestSummarizer),
            SummarizerKind::Model => AnySummarizer::Model(LlmSummarizer::new(Arc::clone(invoker))),
        }
    }
}

impl Summarizer for AnySummarizer {
    async fn summarize(&self, transcript: &str) -> Result<String, InvokeError> {
        match self {
            AnySummarizer::Digest(inner) => inner.summarize(transcript).await,
            AnySummarizer::Model(inner) => inner.summarize(transcript).await,
        }
    }
}

/// The part of the evicted history that gets summarized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryInput {
    pub transcript: String,
    pub digest: String,
    pub covered_turns: usize,
}

impl SummaryInput {
    /// Build from evicted turns. `None` when nothing worth summarizing was evicted.
    pub fn from_evicted(evicted: &[Turn], chunk_chars: usize) -> Option<Self> {
        let lines: Vec<String> = evicted
            .iter()
            .filter(|t| t.is_message() && matches!(t.role, Role::User | Role::Assistant))
            .map(|t| (t.role, t.text()))
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(role, text)| format!("{role}: {text}"))
            .collect();
        if lines.is_empty() {
            return None;
        }

        let full = lines.join("\n");
        let splitter = TextSplitter::new(chunk_chars.max(1));
        let transcript = splitter.chunks(&full).next()?.to_string();
        let digest = format!("{:x}", Sha256::digest(transcript.as_bytes()));

        Some(Self {
            transcript,
            digest,
            covered_turns: lines.len(),
        })
    }
}

/// Bring `current` up to date with `evicted`.
///
/// Returns `Ok(None)` when there is nothing to summarize, the current
/// summary when its digest still matches, or a fresh summary.
pub async fn refresh_summary<S: Summarizer>(
    summarizer: &S,
    evicted: &[Turn],
    chunk_chars: usize,
    current: Option<&ConversationSummary>,
) -> Result<Option<ConversationSummary>, InvokeError> {
    let Some(input) = SummaryInput::from_evicted(evicted, chunk_chars) else {
        return Ok(None);
    };

    if let Some(current) = current.filter(|c| c.source_digest == input.digest) {
        let mut reused = current.clone();
        reused.covered_turns = input.covered_turns;
        return Ok(Some(reused));
    }

    let text = summarizer.summarize(&input.transcript).await?;
    tracing::debug!(
        covered_turns = input.covered_turns,
        chars = input.transcript.len(),
        "Summarized evicted history"
    );
    Ok(Some(ConversationSummary {
        text,
        covered_turns: input.covered_turns,
        source_digest: input.digest,
    }))
}
