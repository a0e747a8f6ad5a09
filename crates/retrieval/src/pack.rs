//! Context packing with citation anchors.
//!
//! Chunk texts concatenate in rank order, each prefixed with `[n]`, until
//! the token budget would be exceeded. Duplicate chunks are dropped. An
//! optional graph section is prepended before any chunk text.

use hearthmind_core::chunk::Chunk;
use hearthmind_core::retrieval::Citation;
use hearthmind_core::token::estimate_tokens;
use std::collections::HashSet;

/// The packed output.
pub struct Packed {
    pub context: String,
    pub citations: Vec<Citation>,
    pub token_est: usize,
}

/// Pack ranked chunks under `budget` tokens.
pub fn pack(chunks: &[Chunk], graph_context: Option<&str>, budget: usize) -> Packed {
    let mut context = String::new();

    if let Some(graph) = graph_context
        && !graph.is_empty()
    {
        let section = format!("## Knowledge Graph\n{graph}\n\n");
        if estimate_tokens(&section) <= budget {
            context.push_str(&section);
        }
    }

    let mut citations = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut index = 1;

    for chunk in chunks {
        if !seen.insert(chunk.id.as_str()) {
            continue;
        }
        let entry = format!("[{index}] {}\n\n", chunk.text.trim());
        if estimate_tokens(&context) + estimate_tokens(&entry) > budget {
            break;
        }
        context.push_str(&entry);
        citations.push(Citation {
            index,
            chunk_id: chunk.id.clone(),
            source_id: chunk.source_id.clone(),
            span: None,
        });
        index += 1;
    }

    let token_est = estimate_tokens(&context);
    Packed {
        context,
        citations,
        token_est,
    }
}
