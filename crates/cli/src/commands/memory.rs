//! `consolidate-memory`: one archival consolidation pass, plus the
//! matching low-importance decay on the knowledge graph.

use crate::app::App;
use anyhow::Result;
use hearthmind_config::AppConfig;
use hearthmind_core::Error;

/// Relation weights decay by this factor per pass, floored at 0.1.
const GRAPH_DECAY_FACTOR: f64 = 0.95;

pub async fn consolidate(config: AppConfig) -> Result<()> {
    let app = App::build(config).await?;

    let before = app.memory.archival_count().await.map_err(Error::Memory)?;
    let report = app.memory.consolidate().await.map_err(Error::Memory)?;
    let after = app.memory.archival_count().await.map_err(Error::Memory)?;

    app.graph.decay(GRAPH_DECAY_FACTOR, 0.1).await;
    app.graph.save().await.map_err(Error::Graph)?;
    let (entities, relations) = app.graph.stats().await;

    println!(
        "Consolidation: {} decayed, {} merged, {} pruned ({} -> {} entries)",
        report.decayed, report.merged, report.pruned, before, after
    );
    println!("Graph: {entities} entities, {relations} relations (weights decayed)");
    app.tracer.flush().await;
    Ok(())
}
