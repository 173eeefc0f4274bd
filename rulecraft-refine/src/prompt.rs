//! # Prompt Templates
//!
//! The three prompts the refinement loop chains together. Every builder embeds
//! its inputs verbatim; nothing is truncated or escaped.

use crate::document::LibraryDocument;

const SEED_RULE: &str = "\
Rule 1: In the pg_pin, if a pin contains the switch_function attribute, it must have the switch_pin: true property.
Example: pg_pin(VDDAI) { switch_function: \"SD\"; }";

/// Focus clause for power-domain isolation rules
pub const ISOLATION_FOCUS: &str = "\
Consider situations when isolation attributes (isolated and isolated_enable and pg type) are used, \
and specify appropriate conditions for power domain relationships between pins and their associated power sources.";

/// Prompt builders for the initial, evaluation and reformatting stages
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptSet {
    focus: Option<String>,
}

impl PromptSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extra instruction appended to the initial prompt
    pub fn with_focus(mut self, focus: impl Into<String>) -> Self {
        let focus = focus.into();
        self.focus = if focus.trim().is_empty() { None } else { Some(focus) };
        self
    }

    /// Prompts steered towards isolation and power-domain rules
    pub fn isolation() -> Self {
        Self::new().with_focus(ISOLATION_FOCUS)
    }

    pub fn focus(&self) -> Option<&str> {
        self.focus.as_deref()
    }

    pub fn initial_prompt(&self, document: &LibraryDocument) -> String {
        let mut prompt = format!(
            "Please generate consistency rules based on the NLDM Lib File. The rules are as follows:\n\n\
             {}\n\n\
             Please generate additional consistency rules and present them in human language.\n",
            SEED_RULE
        );
        if let Some(focus) = &self.focus {
            prompt.push_str(focus);
            prompt.push('\n');
        }
        prompt.push('\n');
        prompt.push_str(document.to_text());
        prompt
    }

    pub fn evaluation_prompt(&self, rules: &str, document: &LibraryDocument) -> String {
        format!(
            "You are an experienced NLDM Lib CAD engineer, and your task is to verify the accuracy \
             of each rule and provide modification suggestions.\n\n\
             Below are my generated rules:\n{rules}\n\n\
             And the corresponding Lib file content:\n{lib}\n\n\
             The Lib file content is correct. Please carefully review each rule for accuracy and \
             provide your assessment.\n\n\
             **Output Format**\n\
             Rule X: Rule Description\n\
             Example:\n\
             Interpretation: Explain the underlying physical meaning in a way that junior engineers can understand.\n\
             Recommendation:\n\n\
             Please prioritize the rules based on accuracy and keep only the **top 10 most important rules**.\n",
            rules = rules,
            lib = document.to_text(),
        )
    }

    pub fn reformat_prompt(&self, evaluated: &str) -> String {
        format!(
            "Based on {}, display the final selected rules.\n\
             Only output the rules in the following format:\n\n\
             Rule:\n\
             Example:\n\
             Interpretation:\n",
            evaluated
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> LibraryDocument {
        LibraryDocument::parse("cell(SW) { pg_pin(VDDAI) { switch_function : \"SD\"; } }").unwrap()
    }

    #[test]
    fn test_initial_prompt_embeds_document() {
        let prompts = PromptSet::new();
        let prompt = prompts.initial_prompt(&doc());
        assert!(prompt.contains("switch_pin: true"));
        assert!(prompt.ends_with(doc().to_text()));
        assert_eq!(prompt, prompts.initial_prompt(&doc()));
    }

    #[test]
    fn test_focus_is_appended_before_document() {
        let prompt = PromptSet::isolation().initial_prompt(&doc());
        let focus_at = prompt.find("isolated_enable").unwrap();
        let doc_at = prompt.find("cell(SW)").unwrap();
        assert!(focus_at < doc_at);

        assert_eq!(PromptSet::new().with_focus("  ").focus(), None);
    }

    #[test]
    fn test_evaluation_prompt_keeps_inputs_verbatim() {
        let rules = "Rule 1: keep\n".repeat(500);
        let prompt = PromptSet::new().evaluation_prompt(&rules, &doc());
        assert!(prompt.contains(&rules));
        assert!(prompt.contains(doc().to_text()));
        assert!(prompt.contains("top 10 most important rules"));
        assert!(prompt.contains("Recommendation:"));
    }

    #[test]
    fn test_reformat_prompt_format() {
        let prompt = PromptSet::new().reformat_prompt("Rule 7: evaluated");
        assert!(prompt.starts_with("Based on Rule 7: evaluated,"));
        assert!(prompt.contains("Rule:\nExample:\nInterpretation:"));
        assert!(!PromptSet::new().reformat_prompt("").is_empty());
    }
}
