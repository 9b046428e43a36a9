use std::io::{self, Write};

use serde::Serialize;
use tracing::{info, warn};

use crate::app::{InspectResult, RunSummary};
use crate::domain::RowStatus;
use crate::pipeline::{PipelineEvent, ProgressSink};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

/// Machine-readable results on stdout; progress goes to the log on stderr.
pub struct JsonOutput;

impl JsonOutput {
    pub fn print_summary(result: &RunSummary) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_inspect(result: &InspectResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::RunStarted { total, .. } => info!(total, "run started"),
            PipelineEvent::RowFinished {
                index,
                status,
                stats,
                ..
            } => {
                let position = index + 1;
                if *status == RowStatus::Error {
                    warn!(row = position, total = stats.total, "row failed");
                } else {
                    info!(
                        row = position,
                        total = stats.total,
                        percent = stats.percent(),
                        "row done"
                    );
                }
            }
            PipelineEvent::RunFinished { stats, .. } => info!(
                processed = stats.processed,
                errors = stats.errors,
                "run finished"
            ),
            _ => {}
        }
    }
}
