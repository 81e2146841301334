use crate::error::ChatError;
use crate::models::{
    ChatResponse, ConversationTurn, GenerationParams, ScoredChunk, SearchStrategy, SourceRef,
};
use crate::traits::{Generator, VectorIndex};
use tracing::{debug, info};

pub const SOURCE_PREVIEW_CHARS: usize = 200;
const TRUNCATION_MARKER: &str = "...";

const INSTRUCTIONS: &str = "Use the following pieces of context to answer the question at the end. \
If you don't know the answer, just say that you don't know, don't try to make up an answer.";

/// In-memory question/answer log for one session. Unbounded until cleared.
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    turns: Vec<ConversationTurn>,
}

impl ConversationHistory {
    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

pub fn build_prompt(history: &[ConversationTurn], context: &[ScoredChunk], question: &str) -> String {
    let mut prompt = String::from(INSTRUCTIONS);
    prompt.push_str("\n\n");

    if !history.is_empty() {
        prompt.push_str("Conversation so far:\n");
        for turn in history {
            prompt.push_str("Human: ");
            prompt.push_str(&turn.question);
            prompt.push_str("\nAssistant: ");
            prompt.push_str(&turn.answer);
            prompt.push('\n');
        }
        prompt.push('\n');
    }

    prompt.push_str("Context:\n");
    let passages: Vec<&str> = context.iter().map(|hit| hit.chunk.content.as_str()).collect();
    prompt.push_str(&passages.join("\n\n"));
    prompt.push_str("\n\nQuestion: ");
    prompt.push_str(question);
    prompt.push_str("\nHelpful Answer:");
    prompt
}

/// First `max_chars` characters of `text`, with a marker when cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &text[..cut]),
        None => text.to_string(),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    pub retriever_k: usize,
    pub strategy: SearchStrategy,
    pub generation: GenerationParams,
    pub return_sources: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            retriever_k: 3,
            strategy: SearchStrategy::Similarity,
            generation: GenerationParams::default(),
            return_sources: true,
        }
    }
}

/// Grounds each question in retrieved chunks plus the session history and
/// records the exchange once the model has answered.
pub struct ConversationEngine<G, I>
where
    G: Generator,
    I: VectorIndex,
{
    generator: G,
    index: I,
    history: ConversationHistory,
    options: EngineOptions,
}

impl<G, I> ConversationEngine<G, I>
where
    G: Generator,
    I: VectorIndex,
{
    pub fn new(generator: G, index: I, options: EngineOptions) -> Self {
        Self {
            generator,
            index,
            history: ConversationHistory::default(),
            options,
        }
    }

    pub async fn ask(&mut self, question: &str) -> Result<ChatResponse, ChatError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ChatError::EmptyQuestion);
        }

        let hits = self
            .index
            .search(question, self.options.retriever_k, self.options.strategy)
            .await?;
        debug!(question = %question, hits = hits.len(), "retrieved context");

        let prompt = build_prompt(self.history.turns(), &hits, question);
        let answer = self
            .generator
            .generate(&prompt, &self.options.generation)
            .await?;

        self.history.push(ConversationTurn {
            question: question.to_string(),
            answer: answer.clone(),
        });
        info!(
            model = %self.generator.model_id(),
            turns = self.history.len(),
            sources = hits.len(),
            "answered question"
        );

        let sources = if self.options.return_sources {
            hits.iter()
                .map(|hit| SourceRef {
                    source: hit.chunk.metadata.source().to_string(),
                    content: preview(&hit.chunk.content, SOURCE_PREVIEW_CHARS),
                })
                .collect()
        } else {
            Vec::new()
        };

        Ok(ChatResponse { answer, sources })
    }

    pub fn clear(&mut self) {
        self.history.clear();
        info!("conversation history cleared");
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn index(&self) -> &I {
        &self.index
    }

    /// Swaps in a freshly built index and hands back the old one.
    pub fn replace_index(&mut self, index: I) -> I {
        std::mem::replace(&mut self.index, index)
    }
}
