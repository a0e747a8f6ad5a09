//! `ingest <path>`: add a source document to the corpus.
//!
//! Reads the file, splits it into chunks, registers the source (duplicate
//! content is rejected), embeds what the backend can handle now, and runs
//! entity extraction into the knowledge graph.

use crate::app::App;
use anyhow::{Context, Result};
use hearthmind_config::AppConfig;
use hearthmind_core::chunk::{Chunk, Source, SourceKind};
use hearthmind_core::{ChunkStore, Error, Gateway};
use hearthmind_graph::{GenerativeExtractor, PatternExtractor};
use hearthmind_index::chunking::{split_text, DEFAULT_CHUNK_CHARS};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::info;

pub async fn run(config: AppConfig, path: &str) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read '{path}'"))?;
    let app = App::build(config).await?;

    let hash = format!("{:x}", Sha256::digest(content.as_bytes()));
    let kind = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(SourceKind::from_extension)
        .unwrap_or(SourceKind::Text);
    let source = Source::new(path, kind, mime_for(kind), hash);

    app.store
        .put_source(&source)
        .await
        .map_err(Error::Store)?;

    let chunks: Vec<Chunk> = split_text(&content, DEFAULT_CHUNK_CHARS)
        .into_iter()
        .enumerate()
        .map(|(i, text)| Chunk::new(&source.id, i as u32, text))
        .collect();
    app.store.put_chunks(&chunks).await.map_err(Error::Store)?;

    let embedded = hearthmind_index::sync_pending(
        app.store.as_ref(),
        app.index.as_ref(),
        app.gateway.as_ref(),
        64,
    )
    .await
    .map_err(Error::Store)?;

    // Graph extraction: the pattern pass always runs; the generative pass
    // joins in when a backend is reachable.
    let pattern = PatternExtractor::new();
    let generative = GenerativeExtractor::new(app.gateway.clone());
    let mut entities = 0usize;
    for chunk in &chunks {
        let mut extraction = pattern.extract(&chunk.text);
        if app.gateway.is_available().await
            && let Ok(generated) = generative.extract(&chunk.text).await
        {
            extraction.entities.extend(generated.entities);
            extraction.relations.extend(generated.relations);
        }

        for candidate in &extraction.entities {
            app.graph
                .upsert_entity(&candidate.name, candidate.kind, candidate.confidence, Some(&chunk.id))
                .await
                .map_err(Error::Graph)?;
            entities += 1;
        }
        for relation in &extraction.relations {
            let Some(src) = app.graph.entity_by_name(&relation.src, None).await else {
                continue;
            };
            let Some(dst) = app.graph.entity_by_name(&relation.dst, None).await else {
                continue;
            };
            app.graph
                .upsert_relation(&src.id, &dst.id, &relation.kind, relation.confidence, Some(&chunk.id))
                .await
                .map_err(Error::Graph)?;
        }
    }
    app.graph.save().await.map_err(Error::Graph)?;
    app.mcp.notify_resources_list_changed();

    info!(
        chunks = chunks.len(),
        embedded, entities, "ingest complete"
    );
    println!(
        "Ingested '{}': {} chunks ({} embedded now, rest pending), {} entity mentions",
        path,
        chunks.len(),
        embedded,
        entities
    );
    if embedded == 0 && !chunks.is_empty() {
        println!("note: embedding backend unreachable; chunks will embed on demand");
    }
    app.tracer.flush().await;
    Ok(())
}

fn mime_for(kind: SourceKind) -> &'static str {
    match kind {
        SourceKind::Pdf => "application/pdf",
        SourceKind::Html => "text/html",
        SourceKind::Audio => "audio/mpeg",
        SourceKind::Image => "image/png",
        SourceKind::Code => "text/x-source",
        SourceKind::Text => "text/plain",
    }
}
