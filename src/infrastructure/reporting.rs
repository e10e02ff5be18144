//! CSV generation reporting.
//!
//! One row per optimizer generation: population summaries plus the best
//! genome's fitness and full gene values, appended to an optimizer CSV.

use crate::application::reporting::{GenerationRecord, GenerationSink, StatSummary};
use crate::domain::strategy::PARAM_SPECS;
use anyhow::{Context, Result};
use std::fs::File;
use std::path::Path;
use std::sync::Mutex;

pub struct CsvGenerationSink {
    writer: Mutex<csv::Writer<File>>,
}

const METRIC_NAMES: [&str; 7] = [
    "fitness",
    "pnl",
    "max_drawdown",
    "sharpe_ratio",
    "sortino_ratio",
    "trades",
    "f1",
];

impl CsvGenerationSink {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create optimizer csv at {}", path.display()))?;
        let mut writer = csv::Writer::from_writer(file);

        let mut header = vec![
            "generation".to_string(),
            "started_at".to_string(),
            "finished_at".to_string(),
        ];
        for metric in METRIC_NAMES {
            for stat in ["mean", "min", "p25", "median", "p75", "max", "stddev"] {
                header.push(format!("{}_{}", metric, stat));
            }
        }
        header.push("best_fitness".to_string());
        for spec in PARAM_SPECS.iter() {
            header.push(format!("best_{}", spec.name));
        }

        writer.write_record(&header).context("Failed to write csv header")?;
        writer.flush().context("Failed to flush csv header")?;

        Ok(Self {
            writer: Mutex::new(writer),
        })
    }
}

fn push_summary(row: &mut Vec<String>, summary: &StatSummary) {
    for value in [
        summary.mean,
        summary.min,
        summary.p25,
        summary.median,
        summary.p75,
        summary.max,
        summary.std_dev,
    ] {
        row.push(format!("{:.6}", value));
    }
}

impl GenerationSink for CsvGenerationSink {
    fn record(&self, record: &GenerationRecord) -> Result<()> {
        let mut row = vec![
            record.generation.to_string(),
            record.started_at.to_rfc3339(),
            record.finished_at.to_rfc3339(),
        ];
        for summary in [
            &record.fitness,
            &record.pnl,
            &record.max_drawdown,
            &record.sharpe_ratio,
            &record.sortino_ratio,
            &record.trades,
            &record.f1,
        ] {
            push_summary(&mut row, summary);
        }
        row.push(format!("{:.6}", record.best.fitness()));
        for gene in record.best.genes() {
            row.push(format!("{:.6}", gene));
        }

        let mut writer = self
            .writer
            .lock()
            .map_err(|e| anyhow::anyhow!("csv writer lock poisoned: {}", e))?;
        writer.write_record(&row).context("Failed to write csv row")?;
        writer.flush().context("Failed to flush csv row")?;
        Ok(())
    }
}
