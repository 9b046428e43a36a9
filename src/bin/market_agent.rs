use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use market_agent::app::{App, EnrichRequest, inspect};
use market_agent::client::EndpointClient;
use market_agent::config::{Settings, SettingsLoader};
use market_agent::endpoint;
use market_agent::error::AgentError;
use market_agent::output::{JsonOutput, OutputMode};
use market_agent::pipeline::PipelineOptions;
use market_agent::tui::Tui;

#[derive(Parser)]
#[command(name = "market-agent")]
#[command(about = "Enrich a spreadsheet of companies with a short AI description of each business")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    /// Path to a market-agent.json config file.
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run the enrichment endpoint (POST /api/search)")]
    Serve(ServeArgs),
    #[command(about = "Research every company in a spreadsheet")]
    Enrich(EnrichArgs),
    #[command(about = "Show headers, row count and detected columns of a spreadsheet")]
    Inspect(InspectArgs),
}

#[derive(Args)]
struct ServeArgs {
    #[arg(long)]
    bind: Option<String>,
}

#[derive(Args)]
struct EnrichArgs {
    input: Utf8PathBuf,

    /// Export path (.xlsx or .csv).
    #[arg(long, short)]
    output: Option<Utf8PathBuf>,

    #[arg(long)]
    name_column: Option<String>,

    #[arg(long)]
    id_column: Option<String>,

    /// Enrichment endpoint URL.
    #[arg(long)]
    endpoint: Option<String>,

    /// Pause between rows, in milliseconds.
    #[arg(long)]
    delay_ms: Option<u64>,
}

#[derive(Args)]
struct InspectArgs {
    input: Utf8PathBuf,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<AgentError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &AgentError) -> u8 {
    match error {
        AgentError::UnsupportedFormat(_)
        | AgentError::Spreadsheet(_)
        | AgentError::EmptySheet
        | AgentError::UnknownColumn(_)
        | AgentError::NameColumnNotSelected
        | AgentError::EmptyTable => 2,
        AgentError::EndpointHttp(_)
        | AgentError::EndpointStatus { .. }
        | AgentError::EndpointResponse(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    // A missing .env is the normal case.
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };
    let settings = SettingsLoader::resolve(cli.config.as_deref())?;
    debug!(?settings, "settings resolved");

    match cli.command {
        Commands::Serve(args) => run_serve(args, settings),
        Commands::Enrich(args) => run_enrich(args, settings, output_mode),
        Commands::Inspect(args) => {
            let result = inspect(&args.input)?;
            JsonOutput::print_inspect(&result).into_diagnostic()
        }
    }
}

fn run_serve(args: ServeArgs, mut settings: Settings) -> miette::Result<()> {
    if let Some(bind) = args.bind {
        settings.bind = bind;
    }
    endpoint::serve(&settings)?;
    Ok(())
}

fn run_enrich(args: EnrichArgs, settings: Settings, mode: OutputMode) -> miette::Result<()> {
    let endpoint_url = args.endpoint.unwrap_or(settings.endpoint_url);
    let output = args.output.unwrap_or(settings.output);
    let row_delay = args
        .delay_ms
        .map(Duration::from_millis)
        .unwrap_or(settings.row_delay);

    let client = EndpointClient::new(endpoint_url.clone(), settings.request_timeout)?;
    let app = App::new(client, PipelineOptions { row_delay });

    match mode {
        OutputMode::NonInteractive => {
            let request = EnrichRequest {
                input: args.input,
                output,
                name_column: args.name_column,
                id_column: args.id_column,
            };
            let summary = app.enrich(&request, Arc::new(JsonOutput))?;
            JsonOutput::print_summary(&summary).into_diagnostic()
        }
        OutputMode::Interactive => {
            app.load(&args.input)?;
            if args.name_column.is_some() {
                app.pipeline().select_name_column(args.name_column)?;
            }
            if args.id_column.is_some() {
                app.pipeline().select_id_column(args.id_column)?;
            }
            let mut tui = Tui::new(app, args.input, output, endpoint_url);
            tui.run()
        }
    }
}
