//! Report generation for run summaries

use crate::summary::RunSummary;
use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Report format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    Markdown,
    Json,
    Csv,
}

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Text => "txt",
            Self::Markdown => "md",
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "txt" => Ok(Self::Text),
            "markdown" | "md" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(format!("unknown report format: {other}")),
        }
    }
}

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

const CSV_HEADER: [&str; 21] = [
    "scenario",
    "wall_duration_s",
    "n_requests",
    "n_success",
    "n_error",
    "error_rate",
    "throughput_rps",
    "p50_ms",
    "p90_ms",
    "p95_ms",
    "p99_ms",
    "max_ms",
    "avg_response_bytes",
    "pool_open",
    "pool_in_use",
    "pool_idle",
    "pool_wait_count",
    "pool_wait_ms",
    "heap_mb",
    "max_concurrent",
    "dropped_samples",
];

/// Result writer for generating run reports
pub struct ResultWriter {
    summary: RunSummary,
}

impl ResultWriter {
    pub fn new(summary: RunSummary) -> Self {
        Self { summary }
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    pub fn render(&self, format: ReportFormat) -> io::Result<String> {
        match format {
            ReportFormat::Text => Ok(self.generate_text()),
            ReportFormat::Markdown => Ok(self.generate_markdown()),
            ReportFormat::Json => self.generate_json(),
            ReportFormat::Csv => self.generate_csv(),
        }
    }

    /// Writes `<dir>/<scenario>.<ext>` and returns its path.
    pub fn write_report(&self, dir: impl AsRef<Path>, format: ReportFormat) -> io::Result<PathBuf> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let path = dir.join(format!(
            "{}.{}",
            file_stem(&self.summary.scenario),
            format.extension()
        ));
        let content = self.render(format)?;

        let mut file = File::create(&path)?;
        file.write_all(content.as_bytes())?;
        Ok(path)
    }

    /// Human-readable summary printed at the end of a run.
    pub fn generate_text(&self) -> String {
        let s = &self.summary;
        let mut out = String::new();

        let _ = writeln!(out, "Scenario: {}", s.scenario);
        let _ = writeln!(out, "  duration        {:.2}s", s.wall_duration.as_secs_f64());
        let _ = writeln!(
            out,
            "  requests        {} ({} ok, {} err, {:.2}% errors)",
            s.n_requests,
            s.n_success,
            s.n_error,
            s.error_rate * 100.0
        );
        let _ = writeln!(out, "  throughput      {:.1} req/s", s.throughput);
        let _ = writeln!(
            out,
            "  latency ms      p50 {:.2}  p90 {:.2}  p95 {:.2}  p99 {:.2}  max {:.2}",
            ms(s.latency_percentiles.p50),
            ms(s.latency_percentiles.p90),
            ms(s.latency_percentiles.p95),
            ms(s.latency_percentiles.p99),
            ms(s.latency_percentiles.max)
        );
        let _ = writeln!(out, "  avg response    {:.0} bytes", s.avg_response_bytes);
        let _ = writeln!(
            out,
            "  db pool         open {} in_use {} idle {} waits {} ({:.2}ms)",
            s.db_pool.open,
            s.db_pool.in_use,
            s.db_pool.idle,
            s.db_pool.wait_count,
            ms(s.db_pool.wait_duration)
        );
        let _ = writeln!(
            out,
            "  memory          {:.1} MB heap, {} bytes / {} allocs, {} reclaim cycles",
            s.memory.heap_mb, s.memory.bytes_allocated, s.memory.allocations, s.memory.reclaim_cycles
        );
        let _ = writeln!(
            out,
            "  concurrency     max {} observed, {} tasks at end, {} workers",
            s.max_concurrent_observed, s.task_count_end, s.worker_threads
        );
        if s.dropped_samples > 0 {
            let _ = writeln!(out, "  dropped samples {}", s.dropped_samples);
        }

        if !s.op_classes.is_empty() {
            let _ = writeln!(out, "  by op class:");
            for (label, stats) in &s.op_classes {
                let _ = writeln!(
                    out,
                    "    {:<26} {:>6} ok {:>6} err {:>6}  p50 {:.2}ms  p95 {:.2}ms",
                    label,
                    stats.count,
                    stats.success,
                    stats.error,
                    ms(stats.p50),
                    ms(stats.p95)
                );
            }
        }
        if !s.errors_by_kind.is_empty() {
            let kinds: Vec<String> = s
                .errors_by_kind
                .iter()
                .map(|(kind, n)| format!("{kind}={n}"))
                .collect();
            let _ = writeln!(out, "  errors          {}", kinds.join(", "));
        }

        out
    }

    fn generate_markdown(&self) -> String {
        let s = &self.summary;

        let mut op_rows = String::new();
        for (label, stats) in &s.op_classes {
            let _ = writeln!(
                op_rows,
                "| {} | {} | {} | {} | {:.2}ms | {:.2}ms |",
                label,
                stats.count,
                stats.success,
                stats.error,
                ms(stats.p50),
                ms(stats.p95)
            );
        }

        let errors = if s.errors_by_kind.is_empty() {
            "No errors recorded".to_string()
        } else {
            s.errors_by_kind
                .iter()
                .map(|(kind, n)| format!("- **{kind}**: {n}"))
                .collect::<Vec<_>>()
                .join("\n")
        };

        format!(
            r#"# Benchmark Report: {}

## Summary

- **Duration**: {:.2} seconds
- **Total Requests**: {}
- **Successful**: {}
- **Failed**: {}
- **Error Rate**: {:.4}%
- **Throughput**: {:.1} req/s

## Latency

| Percentile | Latency |
|------------|---------|
| P50 | {:.2}ms |
| P90 | {:.2}ms |
| P95 | {:.2}ms |
| P99 | {:.2}ms |
| Max | {:.2}ms |

## Operation Classes

| Op class | Count | Success | Error | P50 | P95 |
|----------|-------|---------|-------|-----|-----|
{}
## Resources

- **DB pool**: open {}, in use {}, idle {}, waits {} ({:.2}ms)
- **Heap**: {:.1} MB
- **Allocated**: {} bytes in {} allocations
- **Reclaim cycles**: {} (avg pause {:.3}ms)
- **Max concurrent**: {}
- **Tasks at end**: {}
- **Dropped samples**: {}

## Errors

{}

---

**Report Generated**: {}
"#,
            s.scenario,
            s.wall_duration.as_secs_f64(),
            s.n_requests,
            s.n_success,
            s.n_error,
            s.error_rate * 100.0,
            s.throughput,
            ms(s.latency_percentiles.p50),
            ms(s.latency_percentiles.p90),
            ms(s.latency_percentiles.p95),
            ms(s.latency_percentiles.p99),
            ms(s.latency_percentiles.max),
            op_rows,
            s.db_pool.open,
            s.db_pool.in_use,
            s.db_pool.idle,
            s.db_pool.wait_count,
            ms(s.db_pool.wait_duration),
            s.memory.heap_mb,
            s.memory.bytes_allocated,
            s.memory.allocations,
            s.memory.reclaim_cycles,
            ms(s.memory.reclaim_avg_pause),
            s.max_concurrent_observed,
            s.task_count_end,
            s.dropped_samples,
            errors,
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
        )
    }

    /// Lossless JSON form of the summary.
    fn generate_json(&self) -> io::Result<String> {
        serde_json::to_string_pretty(&self.summary).map_err(io::Error::from)
    }

    /// Header plus one flattened row.
    fn generate_csv(&self) -> io::Result<String> {
        let s = &self.summary;
        let mut writer = csv::Writer::from_writer(Vec::new());

        writer.write_record(CSV_HEADER)?;
        writer.write_record([
            s.scenario.clone(),
            format!("{:.6}", s.wall_duration.as_secs_f64()),
            s.n_requests.to_string(),
            s.n_success.to_string(),
            s.n_error.to_string(),
            format!("{:.6}", s.error_rate),
            format!("{:.3}", s.throughput),
            format!("{:.3}", ms(s.latency_percentiles.p50)),
            format!("{:.3}", ms(s.latency_percentiles.p90)),
            format!("{:.3}", ms(s.latency_percentiles.p95)),
            format!("{:.3}", ms(s.latency_percentiles.p99)),
            format!("{:.3}", ms(s.latency_percentiles.max)),
            format!("{:.1}", s.avg_response_bytes),
            s.db_pool.open.to_string(),
            s.db_pool.in_use.to_string(),
            s.db_pool.idle.to_string(),
            s.db_pool.wait_count.to_string(),
            format!("{:.3}", ms(s.db_pool.wait_duration)),
            format!("{:.2}", s.memory.heap_mb),
            s.max_concurrent_observed.to_string(),
            s.dropped_samples.to_string(),
        ])?;

        let bytes = writer
            .into_inner()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

fn file_stem(scenario: &str) -> String {
    let stem: String = scenario
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        "run".to_string()
    } else {
        stem
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summary::{LatencyPercentiles, OpClassStats};

    fn summary() -> RunSummary {
        let mut s = RunSummary {
            scenario: "read heavy".to_string(),
            wall_duration: Duration::from_secs(2),
            n_requests: 100,
            n_success: 98,
            n_error: 2,
            error_rate: 0.02,
            throughput: 50.0,
            latency_percentiles: LatencyPercentiles {
                p50: Duration::from_millis(4),
                p90: Duration::from_millis(8),
                p95: Duration::from_millis(9),
                p99: Duration::from_millis(12),
                max: Duration::from_millis(20),
            },
            ..Default::default()
        };
        s.op_classes.insert(
            "ListEpics".to_string(),
            OpClassStats {
                count: 80,
                success: 80,
                ..Default::default()
            },
        );
        s.errors_by_kind.insert("timeout".to_string(), 2);
        s
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("JSON".parse::<ReportFormat>().unwrap(), ReportFormat::Json);
        assert_eq!("md".parse::<ReportFormat>().unwrap(), ReportFormat::Markdown);
        assert!("yaml".parse::<ReportFormat>().is_err());
    }

    #[test]
    fn test_text_mentions_breakdown() {
        let text = ResultWriter::new(summary()).generate_text();
        assert!(text.contains("Scenario: read heavy"));
        assert!(text.contains("ListEpics"));
        assert!(text.contains("timeout=2"));
    }

    #[test]
    fn test_csv_has_header_and_row() {
        let csv_text = ResultWriter::new(summary()).render(ReportFormat::Csv).unwrap();
        let mut reader = csv::Reader::from_reader(csv_text.as_bytes());

        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.len(), CSV_HEADER.len());

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(&rows[0][0], "read heavy");
        assert_eq!(&rows[0][2], "100");
    }

    #[test]
    fn test_write_report_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ResultWriter::new(summary());

        let path = writer.write_report(dir.path(), ReportFormat::Json).unwrap();
        assert_eq!(path.file_name().unwrap(), "read_heavy.json");

        let back: RunSummary = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(&back, writer.summary());
    }

    #[test]
    fn test_write_markdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = ResultWriter::new(summary())
            .write_report(dir.path().join("nested"), ReportFormat::Markdown)
            .unwrap();
        let content = fs::read_to_string(path).unwrap();
        assert!(content.starts_with("# Benchmark Report: read heavy"));
        assert!(content.contains("| ListEpics | 80 | 80 | 0 |"));
    }
}
