use crate::metrics::stats::StatsSnapshot;
use crate::report::RunReport;
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::info;

/// Sink for periodic progress snapshots.
pub enum SnapshotWriter {
    Csv(BufWriter<File>),
    Stdout,
}

impl SnapshotWriter {
    pub async fn new_csv(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        ensure_parent(path).await?;
        let file = File::create(path)
            .await
            .with_context(|| format!("creating {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        writer.write_all(StatsSnapshot::csv_header().as_bytes()).await?;
        writer.write_all(b"\n").await?;
        info!(path = %path.display(), "writing progress CSV");
        Ok(Self::Csv(writer))
    }

    pub fn new_stdout() -> Self {
        println!("{}", StatsSnapshot::csv_header());
        Self::Stdout
    }

    pub async fn write_snapshot(&mut self, snapshot: &StatsSnapshot) -> Result<()> {
        match self {
            Self::Csv(writer) => {
                writer.write_all(snapshot.to_csv_row().as_bytes()).await?;
                writer.write_all(b"\n").await?;
                // Flush so external tail/readers see progress promptly
                writer.flush().await?;
            }
            Self::Stdout => {
                println!("{}", snapshot.to_csv_row());
            }
        }
        Ok(())
    }
}

/// One CSV row per queue.
#[derive(Debug, Serialize)]
struct QueueRow<'a> {
    run_id: &'a str,
    ordinal: u32,
    queue: &'a str,
    attempted: u64,
    succeeded: u64,
    failed: u64,
    first_failed_item: Option<u64>,
}

pub fn report_csv(report: &RunReport) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for q in &report.queues {
        writer.serialize(QueueRow {
            run_id: report.run_identity.as_str(),
            ordinal: q.descriptor.ordinal,
            queue: &q.descriptor.name,
            attempted: q.attempted,
            succeeded: q.succeeded,
            failed: q.failed,
            first_failed_item: q.failures.first().map(|o| o.item_index),
        })?;
    }
    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("flushing report CSV: {}", e.error()))
}

pub async fn write_report_csv(report: &RunReport, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    ensure_parent(path).await?;
    fs::write(path, report_csv(report)?)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), "wrote per-queue CSV report");
    Ok(())
}

pub async fn write_report_json(report: &RunReport, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    ensure_parent(path).await?;
    let body = serde_json::to_vec_pretty(report)?;
    fs::write(path, body)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), "wrote JSON report");
    Ok(())
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::QueueHandle;
    use crate::metrics::stats::LatencySummary;
    use crate::naming::RunIdentity;
    use crate::report::{QueueDescriptor, QueueRunResult, SendOutcome};

    fn report() -> RunReport {
        let mut results = Vec::new();
        for ordinal in 1..=2u32 {
            let name = format!("queue-feedface-{ordinal:03}");
            let mut r = QueueRunResult::new(QueueDescriptor {
                ordinal,
                handle: QueueHandle::new(name.as_str()),
                name,
            });
            r.record(SendOutcome::success(1));
            if ordinal == 2 {
                r.record(SendOutcome::failure(2, "timeout"));
            }
            results.push(r.finish());
        }
        RunReport::assemble(
            RunIdentity::parse("feedface").unwrap(),
            chrono::Utc::now(),
            results,
            LatencySummary::default(),
            3.0,
        )
    }

    #[test]
    fn csv_has_one_row_per_queue() {
        let body = String::from_utf8(report_csv(&report()).unwrap()).unwrap();
        let lines: Vec<_> = body.lines().collect();
        assert_eq!(
            lines[0],
            "run_id,ordinal,queue,attempted,succeeded,failed,first_failed_item"
        );
        assert_eq!(lines[1], "feedface,1,queue-feedface-001,1,1,0,");
        assert_eq!(lines[2], "feedface,2,queue-feedface-002,2,1,1,2");
        assert_eq!(lines.len(), 3);
    }

    #[tokio::test]
    async fn json_report_lands_in_nested_dir() {
        let dir = std::env::temp_dir().join(format!("queue-flood-{}", uuid::Uuid::new_v4()));
        let path = dir.join("nested").join("report.json");
        write_report_json(&report(), &path).await.unwrap();
        let parsed: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(parsed["total_attempted"], 3);
        assert_eq!(parsed["total_failed"], 1);
        assert_eq!(parsed["throughput_per_sec"], 3.0);
        let _ = std::fs::remove_dir_all(dir);
    }
}
