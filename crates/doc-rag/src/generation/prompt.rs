//! Prompt templates for grounded document Q&A

use crate::types::{AssembledContext, CitationLabel, ConversationTurn, Document, Role};

/// System instruction plus user prompt handed to the answer generator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Prompt builder for document questions
pub struct PromptBuilder;

impl PromptBuilder {
    /// Grounding rules, phrased in the document's citation unit
    pub fn system_instruction(label: CitationLabel) -> String {
        let unit = label.as_str().to_lowercase();
        format!(
            r#"You are a grounded document Q&A assistant. Answer ONLY from the provided context, with mandatory {unit} citations.

CORE RULES:
1. Use ONLY information from the "Context from the document" section
2. EVERY factual statement MUST cite a {unit} number: [{label} X]
3. If the context is relevant, extract the answer; do not be overly cautious
4. Tables are Markdown: quote exact values with their {unit} numbers
5. Image descriptions start with "[IMAGE DESCRIPTION - {label} X]"

WHEN INFORMATION IS NOT FOUND:
"I cannot find information about [TOPIC] in the provided {unit}s. The context covers {unit}s [X, Y, Z], which discuss [what IS there]."

Language: match the user's language."#,
            unit = unit,
            label = label
        )
    }

    /// Build the full prompt for one question
    pub fn build(
        question: &str,
        context: &AssembledContext,
        document: &Document,
        history: &[ConversationTurn],
        history_turns: usize,
    ) -> Prompt {
        let label = context.citation_label;
        let page_count = document
            .page_count
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let mut user = format!(
            "DOCUMENT METADATA\nDocument Type: {}\nFile Name: {}\nTotal {}s: {}\n\nCONTEXT FROM THE DOCUMENT\n{}\n",
            document.document_type.as_str().to_uppercase(),
            document.filename,
            label,
            page_count,
            context.context
        );

        if !context.page_references.is_empty() {
            user.push_str(&format!(
                "\nSource {}s: {}\n",
                label,
                Self::format_pages(&context.page_references)
            ));
        }

        let history = Self::format_history(history, history_turns);
        if !history.is_empty() {
            user.push_str(&format!("\nCONVERSATION HISTORY:\n{}\n", history));
        }

        user.push_str(&format!(
            "\nUSER'S QUESTION: {}\n\nINSTRUCTIONS:\n- Answer ONLY using the context above\n- Cite {} numbers where you found the information\n- If the information is NOT in the context, say so using the template from the system instructions",
            question,
            label.as_str().to_lowercase()
        ));

        Prompt {
            system: Self::system_instruction(label),
            user,
        }
    }

    fn format_pages(pages: &[u32]) -> String {
        pages
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Last `turns` messages, oldest first
    fn format_history(history: &[ConversationTurn], turns: usize) -> String {
        let start = history.len().saturating_sub(turns);
        history[start..]
            .iter()
            .map(|turn| {
                let speaker = match turn.role {
                    Role::User => "User",
                    Role::Assistant => "Assistant",
                };
                format!("{}: {}", speaker, turn.content)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
