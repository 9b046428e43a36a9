use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use camino::Utf8PathBuf;
use chrono::Local;
use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use miette::IntoDiagnostic;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Clear, Paragraph, Row as TableRow, Table, Wrap};

use crate::app::App;
use crate::client::EnrichmentClient;
use crate::domain::{Row, RowStatus};
use crate::pipeline::{PipelineEvent, PipelineSnapshot, ProgressSink, RunHandle, RunOutcome};
use crate::sources::friendly_source_name;

const EVENTS_MAX: usize = 6;
const SOURCE_LABELS_MAX: usize = 3;
const PAGE_ROWS: usize = 10;
const HELP_STEPS: &[&str] = &[
    "1. Load a spreadsheet (.xlsx, .xls, .ods or .csv) with one company per row.",
    "2. Check the company-name column (n) and the optional CNPJ column (c).",
    "3. Press s to research every row; rows run one at a time.",
    "4. Press d to export the table with the description and sources columns.",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Confirm {
    Reset,
    Reload,
}

#[derive(Debug, Default)]
struct UiState {
    events: VecDeque<String>,
    status: String,
}

struct TuiProgress {
    state: Arc<Mutex<UiState>>,
}

impl ProgressSink for TuiProgress {
    fn event(&self, event: &PipelineEvent) {
        let message = match event {
            PipelineEvent::Initialized { total, .. } => format!("loaded {total} rows"),
            PipelineEvent::RunStarted { total, .. } => format!("research started: {total} rows"),
            PipelineEvent::RowStarted { index, .. } => format!("row {} processing", index + 1),
            PipelineEvent::RowFinished { index, status, .. } => {
                format!("row {} {status}", index + 1)
            }
            PipelineEvent::RunFinished { stats, .. } => format!(
                "research finished: {} ok, {} errors",
                stats.processed, stats.errors
            ),
            PipelineEvent::Reset { .. } => "table cleared".to_string(),
        };
        if let Ok(mut state) = self.state.lock() {
            push_event(&mut state.events, format!("[{}] {message}", timestamp()));
        }
    }
}

pub struct Tui<C: EnrichmentClient + 'static> {
    app: App<C>,
    input: Utf8PathBuf,
    output: Utf8PathBuf,
    endpoint: String,
    state: Arc<Mutex<UiState>>,
    run: Option<RunHandle>,
    confirm: Option<Confirm>,
    show_help: bool,
    scroll: usize,
}

impl<C: EnrichmentClient + 'static> Tui<C> {
    pub fn new(app: App<C>, input: Utf8PathBuf, output: Utf8PathBuf, endpoint: String) -> Self {
        let state = Arc::new(Mutex::new(UiState {
            events: VecDeque::new(),
            status: "ready".to_string(),
        }));
        app.pipeline().subscribe(Arc::new(TuiProgress {
            state: state.clone(),
        }));
        Self {
            app,
            input,
            output,
            endpoint,
            state,
            run: None,
            confirm: None,
            show_help: false,
            scroll: 0,
        }
    }

    pub fn run(&mut self) -> miette::Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode().into_diagnostic()?;
        stdout.execute(EnterAlternateScreen).into_diagnostic()?;

        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).into_diagnostic()?;
        terminal.clear().into_diagnostic()?;

        let result = self.event_loop(&mut terminal);

        disable_raw_mode().into_diagnostic()?;
        let mut stdout = io::stdout();
        stdout.execute(LeaveAlternateScreen).into_diagnostic()?;
        result
    }

    fn event_loop(
        &mut self,
        terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    ) -> miette::Result<()> {
        let mut tick = 0usize;
        loop {
            self.collect_finished_run();
            let snapshot = self.app.pipeline().snapshot();
            if let Ok(state) = self.state.lock() {
                terminal
                    .draw(|frame| draw_ui(frame, self, &snapshot, &state, tick))
                    .into_diagnostic()?;
            }

            if event::poll(Duration::from_millis(120)).into_diagnostic()? {
                if let Event::Key(key) = event::read().into_diagnostic()? {
                    if self.handle_key(key, &snapshot) {
                        break;
                    }
                }
            }
            tick = tick.wrapping_add(1);
        }
        Ok(())
    }

    fn collect_finished_run(&mut self) {
        if !self.run.as_ref().is_some_and(RunHandle::is_finished) {
            return;
        }
        let Some(handle) = self.run.take() else {
            return;
        };
        match handle.join() {
            Ok(RunOutcome::Completed(stats)) => self.set_status(format!(
                "done: {} ok, {} errors. Press d to export.",
                stats.processed, stats.errors
            )),
            Ok(RunOutcome::Abandoned) => self.set_status("previous run discarded"),
            Err(err) => self.set_status(format!("error: {err}")),
        }
    }

    fn handle_key(&mut self, key: KeyEvent, snapshot: &PipelineSnapshot) -> bool {
        if key.kind != KeyEventKind::Press {
            return false;
        }
        if let Some(confirm) = self.confirm {
            match key.code {
                KeyCode::Char('y') | KeyCode::Char('Y') => {
                    self.confirm = None;
                    match confirm {
                        Confirm::Reset => self.reset(),
                        Confirm::Reload => self.reload(),
                    }
                }
                KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => self.confirm = None,
                _ => {}
            }
            return false;
        }
        if self.show_help {
            if matches!(
                key.code,
                KeyCode::Esc | KeyCode::Char('?') | KeyCode::F(1) | KeyCode::Char('q')
            ) {
                self.show_help = false;
            }
            return false;
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return true,
            KeyCode::Char('?') | KeyCode::F(1) => self.show_help = true,
            KeyCode::Char('s') => self.start(),
            KeyCode::Char('n') => self.cycle_column(snapshot, true),
            KeyCode::Char('c') => self.cycle_column(snapshot, false),
            KeyCode::Char('d') => self.export(),
            KeyCode::Char('u') => {
                if snapshot.running {
                    self.confirm = Some(Confirm::Reload);
                } else {
                    self.reload();
                }
            }
            KeyCode::Char('r') => self.confirm = Some(Confirm::Reset),
            KeyCode::Down => self.scroll_by(snapshot, 1),
            KeyCode::Up => self.scroll = self.scroll.saturating_sub(1),
            KeyCode::PageDown => self.scroll_by(snapshot, PAGE_ROWS),
            KeyCode::PageUp => self.scroll = self.scroll.saturating_sub(PAGE_ROWS),
            _ => {}
        }
        false
    }

    fn start(&mut self) {
        match self.app.pipeline().start() {
            Ok(handle) => {
                self.run = Some(handle);
                self.set_status("researching…");
            }
            Err(err) => self.set_status(format!("cannot start: {err}")),
        }
    }

    fn export(&mut self) {
        match self.app.export(&self.output) {
            Ok(result) => self.set_status(format!("exported {} rows to {}", result.rows, result.path)),
            Err(err) => self.set_status(format!("export failed: {err}")),
        }
    }

    fn reload(&mut self) {
        self.scroll = 0;
        match self.app.load(&self.input) {
            Ok(_) => self.set_status(format!("reloaded {}", self.input)),
            Err(err) => self.set_status(format!("reload failed: {err}")),
        }
    }

    fn reset(&mut self) {
        self.scroll = 0;
        self.app.pipeline().reset();
        self.set_status("cleared; press u to load the file again");
    }

    /// Steps through "none" and every header for the chosen picker.
    fn cycle_column(&mut self, snapshot: &PipelineSnapshot, name: bool) {
        let current = if name {
            snapshot.selection.name_column.as_deref()
        } else {
            snapshot.selection.id_column.as_deref()
        };
        let next = next_column(&snapshot.headers, current);
        let pipeline = self.app.pipeline();
        let result = if name {
            pipeline.select_name_column(next.clone())
        } else {
            pipeline.select_id_column(next.clone())
        };
        let label = if name { "name" } else { "CNPJ" };
        match result {
            Ok(()) => self.set_status(format!(
                "{label} column: {}",
                next.as_deref().unwrap_or("none")
            )),
            Err(err) => self.set_status(format!("cannot change {label} column: {err}")),
        }
    }

    fn scroll_by(&mut self, snapshot: &PipelineSnapshot, amount: usize) {
        let max = snapshot.rows.len().saturating_sub(1);
        self.scroll = (self.scroll + amount).min(max);
    }

    fn set_status(&self, message: impl Into<String>) {
        if let Ok(mut state) = self.state.lock() {
            state.status = message.into();
        }
    }
}

fn next_column(headers: &[String], current: Option<&str>) -> Option<String> {
    let position = current.and_then(|current| headers.iter().position(|h| h == current));
    match position {
        None => headers.first().cloned(),
        Some(index) => headers.get(index + 1).cloned(),
    }
}

fn draw_ui<C: EnrichmentClient + 'static>(
    frame: &mut ratatui::Frame,
    tui: &Tui<C>,
    snapshot: &PipelineSnapshot,
    state: &UiState,
    tick: usize,
) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(2),
        ])
        .split(frame.area());

    frame.render_widget(draw_header(tui, snapshot, tick), chunks[0]);

    let main = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(72), Constraint::Percentage(28)])
        .split(chunks[1]);
    frame.render_widget(draw_table(snapshot, tui.scroll, tick), main[0]);
    frame.render_widget(draw_sidebar(snapshot, state), main[1]);
    frame.render_widget(draw_footer(state), chunks[2]);

    if tui.show_help {
        draw_help(frame);
    }
    if let Some(confirm) = tui.confirm {
        draw_confirm(frame, confirm);
    }
}

fn draw_header<C: EnrichmentClient + 'static>(
    tui: &Tui<C>,
    snapshot: &PipelineSnapshot,
    tick: usize,
) -> Paragraph<'static> {
    let hb = if snapshot.running && tick % 2 == 0 { "*" } else { " " };
    let title = Line::from(vec![
        Span::styled(
            "MARKET-AGENT",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" "),
        Span::styled(env!("CARGO_PKG_VERSION"), Style::default().fg(Color::Gray)),
        Span::raw("   File: "),
        Span::styled(tui.input.to_string(), Style::default().fg(Color::Cyan)),
        Span::raw("   "),
        Span::styled(hb, Style::default().fg(Color::Green)),
    ]);
    let endpoint = Line::from(Span::styled(
        format!("Endpoint: {}   Export: {}", tui.endpoint, tui.output),
        Style::default().fg(Color::Gray),
    ));
    Paragraph::new(vec![title, endpoint])
        .alignment(Alignment::Left)
        .block(Block::default().borders(Borders::BOTTOM))
}

fn draw_table(snapshot: &PipelineSnapshot, scroll: usize, tick: usize) -> Table<'static> {
    let name_index = snapshot.column_index(snapshot.selection.name_column.as_deref());
    let id_index = snapshot.column_index(snapshot.selection.id_column.as_deref());

    let rows: Vec<TableRow> = snapshot
        .rows
        .iter()
        .enumerate()
        .skip(scroll)
        .map(|(index, row)| {
            let (glyph, color) = status_glyph(row.status(), tick);
            let name = name_index.map(|i| row.text(i)).unwrap_or_default();
            let id = id_index.map(|i| row.text(i)).unwrap_or_default();
            let description = match row.status() {
                RowStatus::Done => row.description().unwrap_or_default().to_string(),
                RowStatus::Error => row.failure().unwrap_or_default().to_string(),
                RowStatus::Processing => "researching…".to_string(),
                RowStatus::Pending => String::new(),
            };
            TableRow::new(vec![
                Cell::from(format!("{}", index + 1)),
                Cell::from(Span::styled(glyph, Style::default().fg(color))),
                Cell::from(name),
                Cell::from(id),
                Cell::from(description),
                Cell::from(source_labels(row)),
            ])
        })
        .collect();

    let header = TableRow::new(vec!["#", "", "Company", "CNPJ", "Activity", "Sources"]).style(
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    );
    let widths = [
        Constraint::Length(5),
        Constraint::Length(2),
        Constraint::Percentage(22),
        Constraint::Length(19),
        Constraint::Percentage(48),
        Constraint::Percentage(20),
    ];
    Table::new(rows, widths)
        .header(header)
        .block(Block::default().borders(Borders::RIGHT))
}

fn draw_sidebar(snapshot: &PipelineSnapshot, state: &UiState) -> Paragraph<'static> {
    let stats = snapshot.stats;
    let percent = stats.percent();
    let heading = Style::default()
        .fg(Color::Cyan)
        .add_modifier(Modifier::BOLD);
    let mut lines = vec![
        Line::from(Span::styled("COLUMNS", heading)),
        Line::from(vec![
            Span::styled("Name: ", Style::default().fg(Color::Gray)),
            Span::raw(
                snapshot
                    .selection
                    .name_column
                    .clone()
                    .unwrap_or_else(|| "none".to_string()),
            ),
        ]),
        Line::from(vec![
            Span::styled("CNPJ: ", Style::default().fg(Color::Gray)),
            Span::raw(
                snapshot
                    .selection
                    .id_column
                    .clone()
                    .unwrap_or_else(|| "none".to_string()),
            ),
        ]),
        Line::from(""),
        Line::from(Span::styled("PROGRESS", heading)),
        Line::from(vec![
            Span::raw(progress_bar(percent)),
            Span::raw(format!(" {percent:>3}%")),
        ]),
        Line::from(vec![
            Span::styled("Rows: ", Style::default().fg(Color::Gray)),
            Span::raw(format!("{}", stats.total)),
        ]),
        Line::from(vec![
            Span::styled("Done: ", Style::default().fg(Color::Gray)),
            Span::styled(format!("{}", stats.processed), Style::default().fg(Color::Green)),
            Span::styled("   Errors: ", Style::default().fg(Color::Gray)),
            Span::styled(format!("{}", stats.errors), Style::default().fg(Color::Red)),
        ]),
        Line::from(""),
        Line::from(Span::styled("Recent events:", Style::default().fg(Color::Gray))),
    ];
    for event in state.events.iter().rev() {
        lines.push(Line::from(format!("- {event}")));
    }
    Paragraph::new(lines).wrap(Wrap { trim: true })
}

fn draw_footer(state: &UiState) -> Paragraph<'static> {
    Paragraph::new(vec![
        Line::from(Span::styled(
            state.status.clone(),
            Style::default().fg(Color::Yellow),
        )),
        Line::from(Span::styled(
            "s start  n name col  c CNPJ col  d export  u reload  r reset  ? help  q quit",
            Style::default().fg(Color::Gray),
        )),
    ])
}

fn draw_help(frame: &mut ratatui::Frame) {
    let area = centered(frame.area(), 80, 9);
    let mut lines: Vec<Line> = HELP_STEPS.iter().map(|step| Line::from(*step)).collect();
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        "Esc or ? to close",
        Style::default().fg(Color::Gray),
    )));
    let view = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("How to use"))
        .wrap(Wrap { trim: true });
    frame.render_widget(Clear, area);
    frame.render_widget(view, area);
}

fn draw_confirm(frame: &mut ratatui::Frame, confirm: Confirm) {
    let question = match confirm {
        Confirm::Reset => "Clear the table and all results?",
        Confirm::Reload => "A research run is active. Reload the file and discard it?",
    };
    let area = centered(frame.area(), 64, 4);
    let text = Paragraph::new(vec![
        Line::from(question),
        Line::from("Press y to confirm, n to cancel."),
    ])
    .alignment(Alignment::Center)
    .block(Block::default().borders(Borders::ALL).title("Confirm"));
    frame.render_widget(Clear, area);
    frame.render_widget(text, area);
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}

fn status_glyph(status: RowStatus, tick: usize) -> (&'static str, Color) {
    const SPINNER: &[&str] = &["|", "/", "-", "\\"];
    match status {
        RowStatus::Pending => ("·", Color::Gray),
        RowStatus::Processing => (SPINNER[tick % SPINNER.len()], Color::Cyan),
        RowStatus::Done => ("✓", Color::Green),
        RowStatus::Error => ("✗", Color::Red),
    }
}

fn source_labels(row: &Row) -> String {
    let Some(sources) = row.sources() else {
        return String::new();
    };
    let mut labels: Vec<String> = sources
        .iter()
        .take(SOURCE_LABELS_MAX)
        .map(|source| friendly_source_name(source))
        .collect();
    if sources.len() > SOURCE_LABELS_MAX {
        labels.push(format!("+{}", sources.len() - SOURCE_LABELS_MAX));
    }
    labels.join(", ")
}

fn progress_bar(percent: u8) -> String {
    let total = 20;
    let filled = (percent as usize * total) / 100;
    let mut out = String::from("[");
    for i in 0..total {
        out.push(if i < filled { '#' } else { '.' });
    }
    out.push(']');
    out
}

fn push_event(buffer: &mut VecDeque<String>, item: String) {
    buffer.push_back(item);
    while buffer.len() > EVENTS_MAX {
        buffer.pop_front();
    }
}

fn timestamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}
