use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::client::EnrichmentClient;
use crate::domain::{ColumnSelection, Row, RowStatus};
use crate::error::AgentError;
use crate::pipeline::{Pipeline, PipelineOptions, ProgressSink, RunOutcome};
use crate::sheet::{load_records, write_export};

#[derive(Debug, Clone)]
pub struct EnrichRequest {
    pub input: Utf8PathBuf,
    pub output: Utf8PathBuf,
    pub name_column: Option<String>,
    pub id_column: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub input: String,
    pub output: String,
    pub name_column: Option<String>,
    pub id_column: Option<String>,
    pub total: usize,
    pub processed: usize,
    pub errors: usize,
    pub finished_at: String,
    pub rows: Vec<RowSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RowSummary {
    pub index: usize,
    pub status: RowStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RowSummary {
    fn from_row(index: usize, row: &Row) -> Self {
        Self {
            index,
            status: row.status(),
            description: row.description().map(str::to_string),
            sources: row.sources().map(<[String]>::to_vec).unwrap_or_default(),
            error: row.failure().map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InspectResult {
    pub path: String,
    pub headers: Vec<String>,
    pub rows: usize,
    pub name_column: Option<String>,
    pub id_column: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportResult {
    pub path: String,
    pub rows: usize,
}

/// File-level commands on top of a [`Pipeline`].
pub struct App<C: EnrichmentClient + 'static> {
    pipeline: Pipeline<C>,
}

impl<C: EnrichmentClient + 'static> App<C> {
    pub fn new(client: C, options: PipelineOptions) -> Self {
        Self {
            pipeline: Pipeline::new(client, options),
        }
    }

    pub fn pipeline(&self) -> &Pipeline<C> {
        &self.pipeline
    }

    /// Parses `path` and replaces the pipeline table. A file that fails to
    /// parse leaves the current table untouched.
    pub fn load(&self, path: &Utf8Path) -> Result<u64, AgentError> {
        let sheet = load_records(path)?;
        let generation = self.pipeline.initialize(sheet)?;
        info!(path = %path, generation, "spreadsheet loaded into pipeline");
        Ok(generation)
    }

    pub fn export(&self, path: &Utf8Path) -> Result<ExportResult, AgentError> {
        let table = self.pipeline.export_rows();
        if table.rows.is_empty() {
            return Err(AgentError::EmptyTable);
        }
        write_export(path, &table)?;
        info!(path = %path, rows = table.rows.len(), "export written");
        Ok(ExportResult {
            path: path.to_string(),
            rows: table.rows.len(),
        })
    }

    /// Loads, runs to completion and exports without any interaction.
    pub fn enrich(
        &self,
        request: &EnrichRequest,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<RunSummary, AgentError> {
        let subscription = self.pipeline.subscribe(sink);
        let summary = self.run_to_export(request);
        self.pipeline.unsubscribe(subscription);
        summary
    }

    fn run_to_export(&self, request: &EnrichRequest) -> Result<RunSummary, AgentError> {
        self.load(&request.input)?;
        if request.name_column.is_some() {
            self.pipeline
                .select_name_column(request.name_column.clone())?;
        }
        if request.id_column.is_some() {
            self.pipeline.select_id_column(request.id_column.clone())?;
        }

        let handle = self.pipeline.start()?;
        let stats = match handle.join()? {
            RunOutcome::Completed(stats) => stats,
            RunOutcome::Abandoned => return Err(AgentError::RunAbandoned),
        };
        self.export(&request.output)?;

        let snapshot = self.pipeline.snapshot();
        Ok(RunSummary {
            input: request.input.to_string(),
            output: request.output.to_string(),
            name_column: snapshot.selection.name_column.clone(),
            id_column: snapshot.selection.id_column.clone(),
            total: stats.total,
            processed: stats.processed,
            errors: stats.errors,
            finished_at: Utc::now().to_rfc3339(),
            rows: snapshot
                .rows
                .iter()
                .enumerate()
                .map(|(index, row)| RowSummary::from_row(index, row))
                .collect(),
        })
    }
}

/// Headers, row count and detected columns of a spreadsheet, without running.
pub fn inspect(path: &Utf8Path) -> Result<InspectResult, AgentError> {
    let sheet = load_records(path)?;
    let selection = ColumnSelection::detect(&sheet.headers);
    Ok(InspectResult {
        path: path.to_string(),
        rows: sheet.records.len(),
        headers: sheet.headers,
        name_column: selection.name_column,
        id_column: selection.id_column,
    })
}
