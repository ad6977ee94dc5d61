use uuid::Uuid;

use crate::config::{ChunkStrategy, ChunkingProfile};
use crate::embeddings::EmbeddingRouter;
use crate::error::Result;
use crate::llm::{json_repair, LLMProvider};
use crate::types::{Chunk, Document};

#[derive(Debug, Clone)]
pub struct ChunkResult {
    pub id: Uuid,
    pub text: String,
    pub index: usize,
    pub start_offset: usize,
    pub end_offset: usize,
}

pub struct TextChunker {
    profile: ChunkingProfile,
}

impl TextChunker {
    pub fn new(profile: ChunkingProfile) -> Self {
        Self { profile }
    }

    /// Dispatches to the strategy named in the profile, producing
    /// fully-formed Chunks with `parent_id`/`chunk_index` set. `embedder`
    /// is required for `semantic`, `llm` for `agentic`; both strategies
    /// fall back to `fixed_size` when their dependency is absent or
    /// fails.
    pub async fn chunk_document(
        &self,
        doc: &Document,
        embedder: Option<&EmbeddingRouter>,
        llm: Option<&dyn LLMProvider>,
    ) -> Result<Vec<Chunk>> {
        let raw = match self.profile.strategy {
            ChunkStrategy::FixedSize => self.chunk_fixed_size(&doc.content),
            ChunkStrategy::Semantic => match embedder {
                Some(router) => self.chunk_semantic(&doc.content, router).await.unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "semantic chunking failed, falling back to fixed_size");
                    self.chunk_fixed_size(&doc.content)
                }),
                None => self.chunk_fixed_size(&doc.content),
            },
            ChunkStrategy::Agentic => match llm {
                Some(provider) => match self.chunk_agentic(&doc.content, provider).await {
                    Ok(chunks) => chunks,
                    Err(e) => {
                        tracing::warn!(error = %e, "agentic chunking failed, falling back to fixed_size");
                        self.chunk_fixed_size(&doc.content)
                    }
                },
                None => self.chunk_fixed_size(&doc.content),
            },
        };

        Ok(raw
            .into_iter()
            .map(|c| Chunk {
                id: format!("{}_chunk_{}", doc.id, c.index),
                content: c.text,
                parent_id: doc.id.clone(),
                chunk_index: c.index as u32,
                metadata: Default::default(),
            })
            .collect())
    }

    /// Fixed-size sliding window with UTF-8-safe boundaries, preferring
    /// paragraph > sentence > line > word break points near the window
    /// edge. The last chunk may be shorter than `min_chunk_size` only
    /// when it's the only chunk produced.
    pub fn chunk_fixed_size(&self, text: &str) -> Vec<ChunkResult> {
        if text.len() <= self.profile.chunk_size {
            if text.trim().is_empty() {
                return Vec::new();
            }
            return vec![ChunkResult {
                id: Uuid::new_v4(),
                text: text.to_string(),
                index: 0,
                start_offset: 0,
                end_offset: text.len(),
            }];
        }

        let mut chunks = Vec::new();
        let mut start = 0;
        let mut index = 0;

        while start < text.len() {
            let raw_end = (start + self.profile.chunk_size).min(text.len());
            let end = snap_to_char_boundary(text, raw_end);

            let actual_end = if end < text.len() {
                self.find_break_point(text, start, end)
            } else {
                end
            };

            let chunk_text = &text[start..actual_end];

            if chunk_text.len() >= self.profile.min_chunk_size {
                chunks.push(ChunkResult {
                    id: Uuid::new_v4(),
                    text: chunk_text.to_string(),
                    index,
                    start_offset: start,
                    end_offset: actual_end,
                });
                index += 1;
            }

            let step = if actual_end - start > self.profile.chunk_overlap {
                actual_end - start - self.profile.chunk_overlap
            } else {
                actual_end - start
            };

            let raw_next = start + step;
            start = snap_to_char_boundary(text, raw_next);
            if start >= text.len() || step == 0 {
                break;
            }
        }

        chunks
    }

    fn find_break_point(&self, text: &str, start: usize, preferred_end: usize) -> usize {
        let raw_search_start = preferred_end.saturating_sub(200).max(start);
        let search_start = snap_to_char_boundary(text, raw_search_start);
        let safe_end = snap_to_char_boundary(text, preferred_end);

        if search_start >= safe_end {
            return safe_end;
        }

        let search_region = &text[search_start..safe_end];

        if let Some(pos) = search_region.rfind("\n\n") {
            return search_start + pos + 2;
        }
        if let Some(pos) = search_region.rfind(". ") {
            return search_start + pos + 2;
        }
        if let Some(pos) = search_region.rfind(".\n") {
            return search_start + pos + 2;
        }
        if let Some(pos) = search_region.rfind('\n') {
            return search_start + pos + 1;
        }
        if let Some(pos) = search_region.rfind(' ') {
            return search_start + pos + 1;
        }

        safe_end
    }

    /// Splits to sentences, then greedily groups adjacent sentences while
    /// the cosine similarity between the group-mean embedding and the
    /// next sentence stays above `similarity_threshold`, respecting
    /// min/max chunk size.
    pub async fn chunk_semantic(
        &self,
        text: &str,
        embedder: &EmbeddingRouter,
    ) -> Result<Vec<ChunkResult>> {
        let sentences = split_sentences(text);
        if sentences.is_empty() {
            return Ok(Vec::new());
        }

        let embeddings = embedder.embed_batch(&sentences).await?;

        let mut chunks = Vec::new();
        let mut group: Vec<usize> = vec![0];
        let mut group_vector = embeddings[0].clone();
        let mut group_offset = 0usize;
        let mut cursor = sentences[0].len();

        let mut index = 0usize;

        for i in 1..sentences.len() {
            let group_len: usize = group.iter().map(|&g| sentences[g].len()).sum();
            let candidate_len = group_len + sentences[i].len();

            let similarity = cosine_similarity(&group_vector, &embeddings[i]);
            let fits_max = candidate_len <= self.profile.max_chunk_size;

            if similarity >= self.profile.similarity_threshold && fits_max {
                group.push(i);
                group_vector = mean_vector(&group_vector, group.len() - 1, &embeddings[i]);
                cursor += sentences[i].len();
            } else {
                let group_text: String = group.iter().map(|&g| sentences[g].as_str()).collect();
                if group_text.len() >= self.profile.min_chunk_size || chunks.is_empty() {
                    chunks.push(ChunkResult {
                        id: Uuid::new_v4(),
                        text: group_text.clone(),
                        index,
                        start_offset: group_offset,
                        end_offset: group_offset + group_text.len(),
                    });
                    index += 1;
                }
                group_offset += group_text.len();
                group = vec![i];
                group_vector = embeddings[i].clone();
                cursor = group_offset + sentences[i].len();
            }
        }

        let _ = cursor;
        if !group.is_empty() {
            let group_text: String = group.iter().map(|&g| sentences[g].as_str()).collect();
            if !group_text.trim().is_empty() {
                chunks.push(ChunkResult {
                    id: Uuid::new_v4(),
                    text: group_text.clone(),
                    index,
                    start_offset: group_offset,
                    end_offset: group_offset + group_text.len(),
                });
            }
        }

        Ok(chunks)
    }

    /// Asks the LLM for cut points (character offsets) in strict JSON
    /// `{"cuts": [123, 456, ...]}`; falls back to fixed-size on any
    /// failure (LLM error or unparseable/invalid response).
    pub async fn chunk_agentic(&self, text: &str, llm: &dyn LLMProvider) -> Result<Vec<ChunkResult>> {
        let prompt = format!(
            "Split the following text into coherent sections for retrieval indexing. \
             Respond with strict JSON of the form {{\"cuts\": [<char offsets>]}} where each \
             offset is a good place to cut (end of a section), in ascending order. \
             Do not include 0 or the text length.\n\nTEXT:\n{text}"
        );

        let response = llm.invoke(&prompt).await?;
        let value = json_repair::parse_json_response(&response)?;

        let mut cuts: Vec<usize> = value["cuts"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|v| v.as_u64())
            .map(|v| v as usize)
            .filter(|&c| c > 0 && c < text.len())
            .collect();
        cuts.sort_unstable();
        cuts.dedup();

        if cuts.is_empty() {
            return Ok(self.chunk_fixed_size(text));
        }

        let mut chunks = Vec::new();
        let mut start = 0;
        for (index, &cut) in cuts.iter().chain(std::iter::once(&text.len())).enumerate() {
            let end = snap_to_char_boundary(text, cut);
            if end <= start {
                continue;
            }
            let chunk_text = &text[start..end];
            if chunk_text.len() >= self.profile.min_chunk_size || index == cuts.len() {
                chunks.push(ChunkResult {
                    id: Uuid::new_v4(),
                    text: chunk_text.to_string(),
                    index,
                    start_offset: start,
                    end_offset: end,
                });
            }
            start = end;
        }

        if chunks.is_empty() {
            return Ok(self.chunk_fixed_size(text));
        }

        Ok(chunks)
    }
}

fn mean_vector(current_mean: &[f32], prior_count: usize, new_value: &[f32]) -> Vec<f32> {
    let n = (prior_count + 1) as f32;
    current_mean
        .iter()
        .zip(new_value.iter())
        .map(|(m, v)| (m * prior_count as f32 + v) / n)
        .collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Splits on sentence-final punctuation, keeping the punctuation and a
/// trailing space/newline attached to the preceding sentence so
/// concatenation reproduces the source text.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?' | '\u{3002}' | '\u{ff01}' | '\u{ff1f}') {
            while matches!(chars.peek(), Some(' ') | Some('\n')) {
                current.push(chars.next().unwrap());
            }
            sentences.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        sentences.push(current);
    }
    sentences
}

fn snap_to_char_boundary(text: &str, pos: usize) -> usize {
    if pos >= text.len() {
        return text.len();
    }
    let mut p = pos;
    while p > 0 && !text.is_char_boundary(p) {
        p -= 1;
    }
    p
}
