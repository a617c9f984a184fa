//! Prompt construction
//!
//! Passages are numbered `[1]..[n]` in retrieval order and added until the
//! character budget is spent. The first passage is always present, truncated
//! when it alone exceeds the budget.

use ekip_common::SearchResult;

const SYSTEM_PROMPT: &str = "You are the Enterprise Knowledge Intelligence Assistant.\n\n\
RULES:\n\
1. Answer ONLY using the numbered passages in the CONTEXT.\n\
2. If the answer is not in the CONTEXT, say: \"I don't have that information in our knowledge base.\"\n\
3. Do not use external or general knowledge.\n\
4. Be professional and concise.\n\
5. Cite every statement with the passage number in square brackets, e.g. [1] or [2].";

/// Passages selected for one prompt
#[derive(Debug, Clone, PartialEq)]
pub struct PromptContext {
    /// Formatted context block
    pub context: String,
    /// Passage texts as placed in the prompt, index `i` is marker `[i + 1]`
    pub passages: Vec<String>,
}

impl PromptContext {
    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }
}

/// Builds system and user prompts from retrieved passages
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    max_context_chars: usize,
}

impl PromptBuilder {
    pub fn new(max_context_chars: usize) -> Self {
        Self { max_context_chars }
    }

    pub fn system_prompt(&self) -> &'static str {
        SYSTEM_PROMPT
    }

    fn header(number: usize, result: &SearchResult) -> String {
        let page = result
            .chunk
            .page
            .map(|p| format!(", page {}", p))
            .unwrap_or_default();
        format!(
            "[{}] {}{} (similarity {:.3})\n",
            number, result.chunk.filename, page, result.similarity
        )
    }

    /// Number passages and fit them into the character budget
    pub fn build_context(&self, results: &[SearchResult]) -> PromptContext {
        let mut context = String::new();
        let mut passages = Vec::new();
        let mut used = 0;

        for (i, result) in results.iter().enumerate() {
            let header = Self::header(i + 1, result);
            let block_chars = header.chars().count() + result.chunk.text.chars().count() + 1;

            let text = if used + block_chars <= self.max_context_chars {
                result.chunk.text.clone()
            } else if i == 0 {
                let room = self.max_context_chars.saturating_sub(header.chars().count() + 1);
                result.chunk.text.chars().take(room.max(1)).collect()
            } else {
                break;
            };

            context.push_str(&header);
            context.push_str(&text);
            context.push('\n');
            used += header.chars().count() + text.chars().count() + 1;
            passages.push(text);
        }

        PromptContext { context, passages }
    }

    pub fn user_prompt(&self, question: &str, context: &PromptContext) -> String {
        format!(
            "CONTEXT:\n{}\nQUESTION:\n{}\n\n\
             Answer based ONLY on the CONTEXT above and cite passages as [n].",
            context.context, question
        )
    }
}
