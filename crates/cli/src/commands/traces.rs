//! `inspect-traces [--last N]`: show recently exported spans.

use anyhow::{Context, Result};
use hearthmind_config::AppConfig;
use hearthmind_trace::{SpanStatus, SqliteExporter};

pub async fn inspect(config: AppConfig, last: usize) -> Result<()> {
    let path = config.traces_dir().join("traces.db");
    if !path.exists() {
        println!("No trace database at {} yet.", path.display());
        return Ok(());
    }

    let exporter = SqliteExporter::new(path.to_str().context("non-utf8 data root")?).await?;
    let spans = exporter.recent(last).await?;

    if spans.is_empty() {
        println!("No spans recorded.");
        return Ok(());
    }

    println!("{:<34} {:<18} {:<28} {:>8}  status", "trace", "span", "name", "ms");
    for span in spans {
        let status = match span.status {
            SpanStatus::Ok => "ok",
            SpanStatus::Error => "ERROR",
        };
        println!(
            "{:<34} {:<18} {:<28} {:>8}  {}{}",
            span.context.trace_id,
            span.context.span_id,
            span.name,
            span.duration_ms(),
            status,
            span.error
                .as_deref()
                .map(|e| format!(" ({e})"))
                .unwrap_or_default()
        );
    }
    Ok(())
}
