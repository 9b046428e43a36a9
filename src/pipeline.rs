//! Row enrichment pipeline.
//!
//! The pipeline owns the loaded table, its per-row enrichment state and the
//! aggregate counters. Presenters issue commands (`initialize`, `start`,
//! `export_rows`, `reset`) and read owned snapshots; nothing else mutates the
//! state.
//!
//! A run walks the rows in index order on a worker thread, one client call at
//! a time, pausing `row_delay` between rows. Every `initialize` and `reset`
//! bumps a generation counter; a run only writes while the generation it
//! started with is still current, so an abandoned loop can never touch a newer
//! table.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::client::EnrichmentClient;
use crate::config::DEFAULT_ROW_DELAY_MS;
use crate::domain::{
    CellValue, ColumnSelection, ProcessingStats, Row, RowState, RowStatus, SheetData,
};
use crate::error::AgentError;

pub const DESCRIPTION_COLUMN: &str = "Activity Description (AI)";
pub const SOURCES_COLUMN: &str = "Research Sources";
pub const NOT_PROCESSED: &str = "not processed";
pub const SOURCE_SEPARATOR: &str = " | ";

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub row_delay: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            row_delay: Duration::from_millis(DEFAULT_ROW_DELAY_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Initialized {
        generation: u64,
        total: usize,
    },
    RunStarted {
        generation: u64,
        total: usize,
    },
    RowStarted {
        generation: u64,
        index: usize,
    },
    RowFinished {
        generation: u64,
        index: usize,
        status: RowStatus,
        stats: ProcessingStats,
    },
    RunFinished {
        generation: u64,
        stats: ProcessingStats,
    },
    Reset {
        generation: u64,
    },
}

pub trait ProgressSink: Send + Sync {
    fn event(&self, event: &PipelineEvent);
}

/// Returned by [`Pipeline::subscribe`]; pass it to [`Pipeline::unsubscribe`]
/// to stop receiving events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

/// Owned copy of everything a presenter may display.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PipelineSnapshot {
    pub generation: u64,
    pub revision: u64,
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
    pub stats: ProcessingStats,
    pub running: bool,
    pub selection: ColumnSelection,
}

impl PipelineSnapshot {
    pub fn is_finished(&self) -> bool {
        self.stats.is_finished()
    }

    pub fn column_index(&self, column: Option<&str>) -> Option<usize> {
        let column = column?;
        self.headers.iter().position(|header| header == column)
    }
}

/// Rows flattened for export: original columns plus description and sources.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(ProcessingStats),
    /// The table was replaced or cleared while the run was in flight.
    Abandoned,
}

#[derive(Debug)]
pub struct RunHandle {
    generation: u64,
    handle: JoinHandle<RunOutcome>,
}

impl RunHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn join(self) -> Result<RunOutcome, AgentError> {
        self.handle.join().map_err(|_| AgentError::WorkerPanicked)
    }
}

#[derive(Debug, Default)]
struct PipelineState {
    generation: u64,
    revision: u64,
    headers: Vec<String>,
    rows: Vec<Row>,
    stats: ProcessingStats,
    running: bool,
    selection: ColumnSelection,
}

impl PipelineState {
    fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            generation: self.generation,
            revision: self.revision,
            headers: self.headers.clone(),
            rows: self.rows.clone(),
            stats: self.stats,
            running: self.running,
            selection: self.selection.clone(),
        }
    }

    fn validate_column(&self, column: Option<String>) -> Result<Option<String>, AgentError> {
        match column {
            Some(column) if column.is_empty() => Ok(None),
            Some(column) if !self.headers.contains(&column) => {
                Err(AgentError::UnknownColumn(column))
            }
            other => Ok(other),
        }
    }
}

struct Shared {
    state: Mutex<PipelineState>,
    sinks: Mutex<Sinks>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PipelineState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Default)]
struct Sinks {
    next_id: u64,
    entries: Vec<(SubscriptionId, Arc<dyn ProgressSink>)>,
}

/// Held by the worker for the length of a run. If the worker unwinds, the
/// run is closed out: `running` is cleared and a row left mid-call becomes an
/// error, provided the table is still the one the run started on.
struct RunGuard {
    shared: Arc<Shared>,
    generation: u64,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !thread::panicking() {
            return;
        }
        let mut state = self.shared.lock();
        if state.generation != self.generation {
            return;
        }
        let mut interrupted = 0;
        for row in state.rows.iter_mut() {
            if row.status() == RowStatus::Processing {
                row.state = RowState::Error(AgentError::WorkerPanicked.to_string());
                interrupted += 1;
            }
        }
        state.stats.errors += interrupted;
        state.running = false;
        state.revision += 1;
    }
}

#[derive(Debug, Clone, Copy)]
struct RunPlan {
    generation: u64,
    total: usize,
    name_index: usize,
    id_index: Option<usize>,
}

pub struct Pipeline<C: EnrichmentClient> {
    client: Arc<C>,
    shared: Arc<Shared>,
    options: PipelineOptions,
}

impl<C: EnrichmentClient> Clone for Pipeline<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            shared: Arc::clone(&self.shared),
            options: self.options,
        }
    }
}

impl<C: EnrichmentClient + 'static> Pipeline<C> {
    pub fn new(client: C, options: PipelineOptions) -> Self {
        Self {
            client: Arc::new(client),
            shared: Arc::new(Shared {
                state: Mutex::new(PipelineState::default()),
                sinks: Mutex::new(Sinks::default()),
            }),
            options,
        }
    }

    pub fn subscribe(&self, sink: Arc<dyn ProgressSink>) -> SubscriptionId {
        let mut sinks = self.sinks();
        let id = SubscriptionId(sinks.next_id);
        sinks.next_id += 1;
        sinks.entries.push((id, sink));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.sinks().entries.retain(|(entry, _)| *entry != id);
    }

    /// Replaces the table with `sheet`, every row pending. An empty sheet is
    /// rejected without touching the current state.
    pub fn initialize(&self, sheet: SheetData) -> Result<u64, AgentError> {
        if sheet.is_empty() {
            return Err(AgentError::EmptySheet);
        }
        let SheetData { headers, records } = sheet;
        let total = records.len();
        let selection = ColumnSelection::detect(&headers);

        let generation = {
            let mut state = self.lock();
            let generation = state.generation + 1;
            let revision = state.revision + 1;
            *state = PipelineState {
                generation,
                revision,
                headers,
                rows: records.into_iter().map(Row::pending).collect(),
                stats: ProcessingStats::new(total),
                running: false,
                selection,
            };
            generation
        };

        info!(generation, total, "table initialized");
        self.notify(&PipelineEvent::Initialized { generation, total });
        Ok(generation)
    }

    pub fn select_name_column(&self, column: Option<String>) -> Result<(), AgentError> {
        let mut state = self.lock();
        if state.running {
            return Err(AgentError::AlreadyRunning);
        }
        state.selection.name_column = state.validate_column(column)?;
        state.revision += 1;
        Ok(())
    }

    pub fn select_id_column(&self, column: Option<String>) -> Result<(), AgentError> {
        let mut state = self.lock();
        if state.running {
            return Err(AgentError::AlreadyRunning);
        }
        state.selection.id_column = state.validate_column(column)?;
        state.revision += 1;
        Ok(())
    }

    /// Starts a run over every row. Counters restart from zero and earlier
    /// results are overwritten as rows are revisited.
    pub fn start(&self) -> Result<RunHandle, AgentError> {
        let plan = {
            let mut state = self.lock();
            if state.running {
                return Err(AgentError::AlreadyRunning);
            }
            let name_column = state
                .selection
                .name_column
                .clone()
                .filter(|column| !column.is_empty())
                .ok_or(AgentError::NameColumnNotSelected)?;
            if state.rows.is_empty() {
                return Err(AgentError::EmptyTable);
            }
            let name_index = state
                .headers
                .iter()
                .position(|header| *header == name_column)
                .ok_or_else(|| AgentError::UnknownColumn(name_column.clone()))?;
            let id_index = state
                .selection
                .id_column
                .as_ref()
                .and_then(|column| state.headers.iter().position(|header| header == column));

            state.running = true;
            state.stats.processed = 0;
            state.stats.errors = 0;
            state.revision += 1;
            RunPlan {
                generation: state.generation,
                total: state.rows.len(),
                name_index,
                id_index,
            }
        };

        info!(generation = plan.generation, total = plan.total, "enrichment run started");
        self.notify(&PipelineEvent::RunStarted {
            generation: plan.generation,
            total: plan.total,
        });

        let worker = self.clone();
        let spawned = thread::Builder::new()
            .name("enrichment".to_string())
            .spawn(move || worker.drive(plan));
        match spawned {
            Ok(handle) => Ok(RunHandle {
                generation: plan.generation,
                handle,
            }),
            Err(err) => {
                let mut state = self.lock();
                if state.generation == plan.generation {
                    state.running = false;
                    state.revision += 1;
                }
                Err(AgentError::WorkerSpawn(err.to_string()))
            }
        }
    }

    /// Original cells plus the description and joined sources of each row.
    pub fn export_rows(&self) -> ExportTable {
        let state = self.lock();
        let mut headers = state.headers.clone();
        headers.push(DESCRIPTION_COLUMN.to_string());
        headers.push(SOURCES_COLUMN.to_string());

        let rows = state
            .rows
            .iter()
            .map(|row| {
                let mut values = row.values.clone();
                values.resize(state.headers.len(), CellValue::Empty);
                values.push(CellValue::Text(
                    row.description().unwrap_or(NOT_PROCESSED).to_string(),
                ));
                let sources = row
                    .sources()
                    .map(|sources| sources.join(SOURCE_SEPARATOR))
                    .unwrap_or_default();
                values.push(CellValue::from(sources.as_str()));
                values
            })
            .collect();

        ExportTable { headers, rows }
    }

    /// Clears table, counters and selection. Any in-flight run goes stale.
    pub fn reset(&self) {
        let generation = {
            let mut state = self.lock();
            let generation = state.generation + 1;
            let revision = state.revision + 1;
            *state = PipelineState {
                generation,
                revision,
                ..PipelineState::default()
            };
            generation
        };
        info!(generation, "pipeline reset");
        self.notify(&PipelineEvent::Reset { generation });
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        self.lock().snapshot()
    }

    pub fn stats(&self) -> ProcessingStats {
        self.lock().stats
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn is_finished(&self) -> bool {
        self.lock().stats.is_finished()
    }

    fn drive(&self, plan: RunPlan) -> RunOutcome {
        let _guard = RunGuard {
            shared: Arc::clone(&self.shared),
            generation: plan.generation,
        };
        for index in 0..plan.total {
            let request = {
                let mut state = self.lock();
                if state.generation != plan.generation {
                    return self.abandon(plan, index);
                }
                let row = &mut state.rows[index];
                row.state = RowState::Processing;
                let name = row.text(plan.name_index);
                let id = plan
                    .id_index
                    .map(|id_index| row.text(id_index))
                    .unwrap_or_default();
                state.revision += 1;
                (name, id)
            };
            self.notify(&PipelineEvent::RowStarted {
                generation: plan.generation,
                index,
            });

            let (name, id) = request;
            debug!(index, company = %name, "enriching row");
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                self.client.fetch_company_info(&name, &id)
            }))
            .unwrap_or_else(|payload| {
                Err(AgentError::ClientPanicked(panic_message(&*payload)))
            });

            let (status, stats) = {
                let mut state = self.lock();
                if state.generation != plan.generation {
                    return self.abandon(plan, index);
                }
                let status = match result {
                    Ok(enrichment) => {
                        state.rows[index].state = RowState::Done(enrichment);
                        state.stats.processed += 1;
                        RowStatus::Done
                    }
                    Err(err) => {
                        warn!(index, company = %name, error = %err, "row enrichment failed");
                        state.rows[index].state = RowState::Error(err.to_string());
                        state.stats.errors += 1;
                        RowStatus::Error
                    }
                };
                state.revision += 1;
                (status, state.stats)
            };
            self.notify(&PipelineEvent::RowFinished {
                generation: plan.generation,
                index,
                status,
                stats,
            });

            if index + 1 < plan.total && !self.options.row_delay.is_zero() {
                thread::sleep(self.options.row_delay);
            }
        }

        let stats = {
            let mut state = self.lock();
            if state.generation != plan.generation {
                return self.abandon(plan, plan.total);
            }
            state.running = false;
            state.revision += 1;
            state.stats
        };
        info!(
            generation = plan.generation,
            processed = stats.processed,
            errors = stats.errors,
            "enrichment run finished"
        );
        self.notify(&PipelineEvent::RunFinished {
            generation: plan.generation,
            stats,
        });
        RunOutcome::Completed(stats)
    }

    fn abandon(&self, plan: RunPlan, index: usize) -> RunOutcome {
        info!(
            generation = plan.generation,
            index, "table replaced during run; stopping stale loop"
        );
        RunOutcome::Abandoned
    }

    fn notify(&self, event: &PipelineEvent) {
        let sinks: Vec<Arc<dyn ProgressSink>> = self
            .sinks()
            .entries
            .iter()
            .map(|(_, sink)| Arc::clone(sink))
            .collect();
        for sink in sinks {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| sink.event(event))) {
                warn!(panic = %panic_message(&*payload), "progress sink panicked");
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, PipelineState> {
        self.shared.lock()
    }

    fn sinks(&self) -> MutexGuard<'_, Sinks> {
        self.shared
            .sinks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
