//! Turns ranked search results into the grounded context handed to answer generation.

use std::collections::HashSet;

use serde::Serialize;

use crate::retriever::SearchResult;

/// Separator between retrieved texts in the context.
pub const CONTEXT_SEPARATOR: &str = "\n\n";
/// Prefix of each line in the reference block.
pub const REFERENCE_PREFIX: &str = "- ";

/// Context text plus attribution, in retrieval order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroundedContext {
    pub context_text: String,
    pub reference_block: String,
    /// Deduplicated titles behind `reference_block`.
    pub references: Vec<String>,
}

impl GroundedContext {
    pub fn is_empty(&self) -> bool {
        self.context_text.is_empty()
    }
}

/// Titles of `results` in first-seen order, each once (exact string match).
pub fn unique_titles(results: &[SearchResult]) -> Vec<String> {
    let mut seen = HashSet::new();
    results
        .iter()
        .filter(|r| seen.insert(r.title.as_str()))
        .map(|r| r.title.clone())
        .collect()
}

pub fn assemble(results: &[SearchResult]) -> GroundedContext {
    let context_text = results
        .iter()
        .map(|r| r.text.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR);
    let references = unique_titles(results);
    let reference_block = references
        .iter()
        .map(|t| format!("{REFERENCE_PREFIX}{t}"))
        .collect::<Vec<_>>()
        .join("\n");
    GroundedContext {
        context_text,
        reference_block,
        references,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(title: &str, text: &str, score: f32) -> SearchResult {
        SearchResult {
            title: title.into(),
            text: text.into(),
            score,
        }
    }

    #[test]
    fn titles_dedup_in_first_seen_order() {
        let results: Vec<SearchResult> = ["A", "B", "A", "C", "B"]
            .iter()
            .map(|t| result(t, "x", 0.5))
            .collect();
        assert_eq!(unique_titles(&results), vec!["A", "B", "C"]);
    }

    #[test]
    fn dedup_is_exact_match() {
        let results = vec![result("Reglamento", "x", 0.9), result("reglamento", "y", 0.8)];
        assert_eq!(unique_titles(&results).len(), 2);
    }

    #[test]
    fn assemble_keeps_retrieval_order() {
        let results = vec![
            result("Calendario", "Plazo de matrícula: lunes 4 de agosto", 0.9),
            result("Reglamento", "Artículo 12", 0.7),
            result("Calendario", "Inicio de clases: 11 de agosto", 0.6),
        ];
        let ctx = assemble(&results);
        assert_eq!(
            ctx.context_text,
            "Plazo de matrícula: lunes 4 de agosto\n\nArtículo 12\n\nInicio de clases: 11 de agosto"
        );
        assert_eq!(ctx.reference_block, "- Calendario\n- Reglamento");
        assert_eq!(ctx.references, vec!["Calendario", "Reglamento"]);
    }

    #[test]
    fn empty_results_give_empty_context() {
        let ctx = assemble(&[]);
        assert!(ctx.is_empty());
        assert!(ctx.reference_block.is_empty());
        assert!(ctx.references.is_empty());
    }
}
