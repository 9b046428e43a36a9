use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use market_agent::app::{App, EnrichRequest, inspect};
use market_agent::client::EnrichmentClient;
use market_agent::domain::{CellValue, Enrichment, RowStatus};
use market_agent::error::AgentError;
use market_agent::output::JsonOutput;
use market_agent::pipeline::{PipelineEvent, PipelineOptions, ProgressSink};
use market_agent::sheet::load_records;

struct EchoClient;

impl EnrichmentClient for EchoClient {
    fn fetch_company_info(&self, name: &str, id: &str) -> Result<Enrichment, AgentError> {
        if name.is_empty() {
            return Err(AgentError::EndpointHttp("timed out".to_string()));
        }
        Ok(Enrichment {
            text: format!("{name} ({id}) atua no varejo."),
            sources: vec!["https://cnpj.biz/x".to_string()],
        })
    }
}

#[derive(Default)]
struct RunCounter {
    runs: AtomicUsize,
}

impl ProgressSink for RunCounter {
    fn event(&self, event: &PipelineEvent) {
        if matches!(event, PipelineEvent::RunStarted { .. }) {
            self.runs.fetch_add(1, Ordering::SeqCst);
        }
    }
}

fn app() -> App<EchoClient> {
    App::new(
        EchoClient,
        PipelineOptions {
            row_delay: Duration::ZERO,
        },
    )
}

fn fixture(dir: &tempfile::TempDir, name: &str, content: &str) -> Utf8PathBuf {
    let path = Utf8PathBuf::from_path_buf(dir.path().join(name)).unwrap();
    fs::write(path.as_std_path(), content).unwrap();
    path
}

#[test]
fn enrich_runs_and_exports_workbook() {
    let dir = tempfile::tempdir().unwrap();
    let input = fixture(
        &dir,
        "empresas.csv",
        "Empresa,Documento\nAcme,001\n,002\n",
    );
    let output = Utf8PathBuf::from_path_buf(dir.path().join("out/resultado.xlsx")).unwrap();

    let summary = app()
        .enrich(
            &EnrichRequest {
                input,
                output: output.clone(),
                name_column: None,
                id_column: None,
            },
            Arc::new(JsonOutput),
        )
        .unwrap();

    assert_eq!(summary.total, 2);
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.errors, 1);
    assert_eq!(summary.name_column.as_deref(), Some("Empresa"));
    assert_eq!(summary.rows[0].status, RowStatus::Done);
    assert_eq!(summary.rows[1].status, RowStatus::Error);
    assert!(summary.rows[1].description.is_none());

    let exported = load_records(&output).unwrap();
    assert_eq!(
        exported.headers,
        vec![
            "Empresa",
            "Documento",
            "Activity Description (AI)",
            "Research Sources"
        ]
    );
    assert_eq!(
        exported.records[0][2],
        CellValue::from("Acme (001) atua no varejo.")
    );
    assert_eq!(exported.records[1][2], CellValue::from("not processed"));
}

#[test]
fn enrich_honors_column_overrides() {
    let dir = tempfile::tempdir().unwrap();
    let input = fixture(&dir, "lista.csv", "Fantasia,Empresa\nLoja Azul,Azul SA\n");
    let output = Utf8PathBuf::from_path_buf(dir.path().join("lista.csv.out.csv")).unwrap();

    let summary = app()
        .enrich(
            &EnrichRequest {
                input,
                output: output.clone(),
                name_column: Some("Fantasia".to_string()),
                id_column: None,
            },
            Arc::new(JsonOutput),
        )
        .unwrap();
    assert_eq!(
        summary.rows[0].description.as_deref(),
        Some("Loja Azul () atua no varejo.")
    );

    assert_matches!(
        app().enrich(
            &EnrichRequest {
                input: fixture(&dir, "outra.csv", "Empresa\nAcme\n"),
                output,
                name_column: Some("Fantasia".to_string()),
                id_column: None,
            },
            Arc::new(JsonOutput),
        ),
        Err(AgentError::UnknownColumn(_))
    );
}

#[test]
fn failed_load_keeps_current_table() {
    let dir = tempfile::tempdir().unwrap();
    let app = app();
    app.load(&fixture(&dir, "ok.csv", "Empresa\nAcme\nBeta\n"))
        .unwrap();

    assert_matches!(
        app.load(&fixture(&dir, "vazio.csv", "Empresa\n")),
        Err(AgentError::EmptySheet)
    );
    assert_eq!(app.pipeline().snapshot().rows.len(), 2);
}

#[test]
fn export_without_table_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let output = Utf8PathBuf::from_path_buf(dir.path().join("out.xlsx")).unwrap();
    assert_matches!(app().export(&output), Err(AgentError::EmptyTable));
    assert!(!output.as_std_path().exists());
}

#[test]
fn inspect_reports_detected_columns() {
    let dir = tempfile::tempdir().unwrap();
    let result = inspect(&fixture(
        &dir,
        "empresas.csv",
        "Razão Social,CNPJ,Cidade\nAcme,1,Recife\n",
    ))
    .unwrap();
    assert_eq!(result.rows, 1);
    assert_eq!(result.headers.len(), 3);
    assert_eq!(result.name_column.as_deref(), Some("Razão Social"));
    assert_eq!(result.id_column.as_deref(), Some("CNPJ"));
}

#[test]
fn repeated_enrich_does_not_accumulate_sinks() {
    let dir = tempfile::tempdir().unwrap();
    let app = app();
    let first = Arc::new(RunCounter::default());
    let second = Arc::new(RunCounter::default());

    for (name, sink) in [("a.csv", &first), ("b.csv", &second)] {
        app.enrich(
            &EnrichRequest {
                input: fixture(&dir, name, "Empresa\nAcme\n"),
                output: Utf8PathBuf::from_path_buf(dir.path().join(format!("{name}.xlsx")))
                    .unwrap(),
                name_column: None,
                id_column: None,
            },
            sink.clone(),
        )
        .unwrap();
    }

    assert_eq!(first.runs.load(Ordering::SeqCst), 1);
    assert_eq!(second.runs.load(Ordering::SeqCst), 1);
}
