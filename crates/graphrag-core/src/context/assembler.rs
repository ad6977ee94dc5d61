use crate::config::RagAssemblyConfig;
use crate::types::{ResultType, RetrievalResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Entity,
    Document,
    Graph,
    Other,
}

impl Section {
    fn of(result_type: Option<ResultType>) -> Self {
        match result_type {
            Some(ResultType::Entity) => Section::Entity,
            Some(ResultType::DocumentChunk) | Some(ResultType::Bm25Chunk) => Section::Document,
            Some(ResultType::Relationship) | Some(ResultType::Triple) | Some(ResultType::Community) => Section::Graph,
            _ => Section::Other,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Section::Entity => "Entity Info",
            Section::Document => "Document Content",
            Section::Graph => "Graph Info",
            Section::Other => "Other Relevant",
        }
    }
}

/// Packs ranked `RetrievalResult`s into a single prompt-ready context
/// string. Answer-prompt formatting and streaming live outside this
/// crate — this only decides which evidence survives the character
/// budget and in what order.
pub struct ContextAssembler {
    config: RagAssemblyConfig,
}

impl ContextAssembler {
    pub fn new(config: RagAssemblyConfig) -> Self {
        Self { config }
    }

    /// Quota-per-section selection (roughly `top_k / 4` for each of
    /// entity/document/graph/other), backfilled from the unselected pool
    /// by score when a section's quota goes unfilled, truncated per item
    /// and then as a whole with an explicit `[truncated]` marker.
    /// Falls back to a flat top-N list under a generic header when no
    /// result in `results` carries a `result_type` at all.
    pub fn assemble(&self, results: &[RetrievalResult]) -> AssembledContext {
        if results.is_empty() {
            return AssembledContext {
                text: String::new(),
                items_included: 0,
                items_available: 0,
                truncated: false,
            };
        }

        if results.iter().all(|r| r.result_type.is_none()) {
            return self.assemble_flat(results);
        }

        let top_k = self.config.default_top_k.max(1);
        let quota = top_k.div_ceil(4).max(1);

        let mut buckets: Vec<(Section, Vec<&RetrievalResult>)> = vec![
            (Section::Entity, Vec::new()),
            (Section::Document, Vec::new()),
            (Section::Graph, Vec::new()),
            (Section::Other, Vec::new()),
        ];
        for result in results {
            let section = Section::of(result.result_type);
            buckets.iter_mut().find(|(s, _)| *s == section).unwrap().1.push(result);
        }

        let mut selected: Vec<&RetrievalResult> = Vec::new();
        let mut leftover: Vec<&RetrievalResult> = Vec::new();
        for (_, bucket) in &buckets {
            let (head, tail) = bucket.split_at(bucket.len().min(quota));
            selected.extend(head.iter().copied());
            leftover.extend(tail.iter().copied());
        }

        if selected.len() < top_k {
            leftover.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
            selected.extend(leftover.into_iter().take(top_k - selected.len()));
        }

        let mut by_section: Vec<(Section, Vec<&RetrievalResult>)> = vec![
            (Section::Entity, Vec::new()),
            (Section::Document, Vec::new()),
            (Section::Graph, Vec::new()),
            (Section::Other, Vec::new()),
        ];
        for result in &selected {
            let section = Section::of(result.result_type);
            by_section.iter_mut().find(|(s, _)| *s == section).unwrap().1.push(*result);
        }

        let mut text = String::new();
        let mut included = 0usize;
        for (section, items) in &by_section {
            if items.is_empty() {
                continue;
            }
            if !text.is_empty() {
                text.push_str("\n\n");
            }
            text.push_str(section.label());
            text.push_str(":\n");
            for item in items {
                text.push_str(&truncate_chars(&item.content, self.config.max_content_per_item));
                text.push('\n');
                included += 1;
            }
        }

        let truncated = text.chars().count() > self.config.max_context_length;
        if truncated {
            let mut budget: String = text.chars().take(self.config.max_context_length).collect();
            budget.push_str("\n[truncated]");
            text = budget;
        }

        AssembledContext {
            text,
            items_included: included,
            items_available: results.len(),
            truncated: truncated || included < results.len(),
        }
    }

    /// No result carries a `result_type`: emit the raw top-N verbatim
    /// under a generic header rather than returning an empty context.
    fn assemble_flat(&self, results: &[RetrievalResult]) -> AssembledContext {
        let mut text = String::from("Relevant Information:\n");
        let mut included = 0usize;
        for result in results.iter().take(self.config.default_top_k.max(1)) {
            text.push_str(&truncate_chars(&result.content, self.config.max_content_per_item));
            text.push('\n');
            included += 1;
        }

        let truncated = text.chars().count() > self.config.max_context_length;
        if truncated {
            let mut budget: String = text.chars().take(self.config.max_context_length).collect();
            budget.push_str("\n[truncated]");
            text = budget;
        }

        AssembledContext {
            text,
            items_included: included,
            items_available: results.len(),
            truncated: truncated || included < results.len(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub text: String,
    pub items_included: usize,
    pub items_available: usize,
    pub truncated: bool,
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut truncated: String = s.chars().take(max_chars).collect();
    truncated.push('…');
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RagAssemblyConfig {
        RagAssemblyConfig {
            default_top_k: 10,
            max_context_length: 1000,
            max_content_per_item: 100,
        }
    }

    #[test]
    fn sections_are_labeled_and_ordered_entity_document_graph_other() {
        let chunk = RetrievalResult::new("chunk one", 0.9).with_type(ResultType::DocumentChunk);
        let entity = RetrievalResult::new("entity one", 0.85).with_type(ResultType::Entity);
        let relationship = RetrievalResult::new("rel one", 0.7).with_type(ResultType::Relationship);

        let assembler = ContextAssembler::new(config());
        let assembled = assembler.assemble(&[chunk, entity, relationship]);

        assert!(assembled.text.contains("Entity Info:"));
        assert!(assembled.text.contains("Document Content:"));
        assert!(assembled.text.contains("Graph Info:"));

        let entity_pos = assembled.text.find("Entity Info:").unwrap();
        let document_pos = assembled.text.find("Document Content:").unwrap();
        let graph_pos = assembled.text.find("Graph Info:").unwrap();
        assert!(entity_pos < document_pos);
        assert!(document_pos < graph_pos);
        assert_eq!(assembled.items_included, 3);
    }

    #[test]
    fn per_section_quota_overflow_is_backfilled_by_score_from_other_sections() {
        let mut small_config = config();
        small_config.default_top_k = 4;
        let documents: Vec<RetrievalResult> = (0..4)
            .map(|i| RetrievalResult::new(format!("doc {i}"), 0.9 - i as f32 * 0.01).with_type(ResultType::DocumentChunk))
            .collect();
        let entity = RetrievalResult::new("entity one", 0.95).with_type(ResultType::Entity);

        let mut results = documents;
        results.push(entity);

        let assembler = ContextAssembler::new(small_config);
        let assembled = assembler.assemble(&results);

        assert!(assembled.text.contains("entity one"));
        assert!(assembled.text.contains("doc 0"));
    }

    #[test]
    fn truncation_marker_appears_when_budget_is_exceeded() {
        let mut small_config = config();
        small_config.max_context_length = 30;
        small_config.max_content_per_item = 40;
        let results = vec![
            RetrievalResult::new("a".repeat(40), 0.9).with_type(ResultType::DocumentChunk),
            RetrievalResult::new("b".repeat(40), 0.8).with_type(ResultType::DocumentChunk),
        ];
        let assembler = ContextAssembler::new(small_config);
        let assembled = assembler.assemble(&results);
        assert!(assembled.truncated);
        assert!(assembled.text.ends_with("[truncated]"));
    }

    #[test]
    fn unclassified_results_fall_back_to_a_flat_verbatim_listing() {
        let results = vec![RetrievalResult::new("plain content", 0.9), RetrievalResult::new("more content", 0.8)];
        let assembler = ContextAssembler::new(config());
        let assembled = assembler.assemble(&results);
        assert!(assembled.text.contains("Relevant Information:"));
        assert!(assembled.text.contains("plain content"));
        assert!(assembled.text.contains("more content"));
        assert_eq!(assembled.items_included, 2);
    }

    #[test]
    fn empty_input_yields_empty_untruncated_context() {
        let assembler = ContextAssembler::new(config());
        let assembled = assembler.assemble(&[]);
        assert!(assembled.text.is_empty());
        assert!(!assembled.truncated);
    }
}
