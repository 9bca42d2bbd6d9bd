//! # Orthos CLI Entry Point
//!
//! Main binary for the Orthos corrector. Every command takes the corrector
//! configuration as its first argument.
//!
//! ## Usage
//!
//! ```bash
//! # Build every module's model artifacts
//! orthos corrector.json train
//!
//! # Test one module against a different held-out file
//! orthos corrector.json test lexicon -p test_source=heldout.txt
//!
//! # Annotate a document with two modules, parameters passed through
//! orthos corrector.json run letter.txt errorlist,confusible -p lang=en
//!
//! # Score a run against a reference annotation
//! orthos corrector.json evaluate letter.txt letter.ref.json
//!
//! # Start, inspect and stop the module servers configured for this host
//! orthos corrector.json startservers
//! orthos corrector.json listservers
//! orthos corrector.json stopservers --force
//! ```
//!
//! ## Exit Status
//!
//! `0` on success, `1` when the command fails (including lifecycle stages
//! where any module failed), `2` when the arguments cannot be parsed.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use argh::FromArgs;

use orthos_cli::commands;
use orthos_common::RunParameters;
use orthos_orchestrator::{Corrector, Stage};

#[derive(FromArgs)]
/// Orthos - orchestrates spelling and grammar correction modules
struct Cli {
    /// path to the corrector configuration (JSON)
    #[argh(positional)]
    config: PathBuf,

    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Reset(ResetArgs),
    Train(TrainArgs),
    Test(TestArgs),
    Tune(TuneArgs),
    Run(RunArgs),
    Evaluate(EvaluateArgs),
    StartServers(StartServersArgs),
    StopServers(StopServersArgs),
    ListServers(ListServersArgs),
    Serve(ServeArgs),
}

#[derive(FromArgs)]
#[argh(subcommand, name = "reset")]
/// delete model artifacts
struct ResetArgs {
    /// comma-separated module ids (default: all)
    #[argh(positional)]
    ids: Option<String>,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "train")]
/// build model artifacts from sources
struct TrainArgs {
    /// comma-separated module ids (default: all)
    #[argh(positional)]
    ids: Option<String>,

    /// module parameter as key=value, may be repeated
    #[argh(option, short = 'p', long = "param")]
    params: Vec<String>,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "test")]
/// evaluate trained modules on their test data
struct TestArgs {
    /// comma-separated module ids (default: all)
    #[argh(positional)]
    ids: Option<String>,

    /// module parameter as key=value, may be repeated
    #[argh(option, short = 'p', long = "param")]
    params: Vec<String>,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "tune")]
/// tune module parameters
struct TuneArgs {
    /// comma-separated module ids (default: all)
    #[argh(positional)]
    ids: Option<String>,

    /// module parameter as key=value, may be repeated
    #[argh(option, short = 'p', long = "param")]
    params: Vec<String>,
}

/// Arguments for annotating a document.
///
/// The annotated document is written as JSON to stdout unless `-o` is
/// given. Modules that fail are listed in the output's `failures` and the
/// document is marked partial; the command itself only fails when no
/// module succeeded.
#[derive(FromArgs)]
#[argh(subcommand, name = "run")]
/// annotate a document
struct RunArgs {
    /// document to annotate (plain text, or a serialized document ending in .json)
    #[argh(positional)]
    document: PathBuf,

    /// comma-separated module ids (default: all)
    #[argh(positional)]
    ids: Option<String>,

    /// write the annotated document here instead of stdout
    #[argh(option, short = 'o')]
    output: Option<PathBuf>,

    /// module parameter as key=value, may be repeated
    #[argh(option, short = 'p', long = "param")]
    params: Vec<String>,

    /// run every module in-process, ignoring configured servers
    #[argh(switch)]
    local: bool,

    /// maximum number of modules invoked at once
    #[argh(option)]
    threads: Option<usize>,

    /// per-module timeout in milliseconds
    #[argh(option, long = "timeout-ms")]
    timeout_ms: Option<u64>,

    /// verbose logging, also passed on to modules
    #[argh(switch)]
    debug: bool,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "evaluate")]
/// score a run against a reference annotation
struct EvaluateArgs {
    /// document to annotate
    #[argh(positional)]
    document: PathBuf,

    /// reference corrections (JSON)
    #[argh(positional)]
    reference: PathBuf,

    /// comma-separated module ids (default: all)
    #[argh(positional)]
    ids: Option<String>,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "startservers")]
/// start the module servers configured for this host
struct StartServersArgs {
    /// comma-separated module ids (default: all)
    #[argh(positional)]
    ids: Option<String>,

    /// additional name under which this host appears in the configuration
    #[argh(option)]
    host: Option<String>,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "stopservers")]
/// stop module servers on this host
struct StopServersArgs {
    /// comma-separated module ids (default: all)
    #[argh(positional)]
    ids: Option<String>,

    /// abort in-flight requests instead of draining them
    #[argh(switch)]
    force: bool,

    /// additional name under which this host appears in the configuration
    #[argh(option)]
    host: Option<String>,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "listservers")]
/// show reachability and load of every configured server
struct ListServersArgs {}

/// Arguments for serving one module.
///
/// This is what `startservers` launches for each endpoint; it can also be
/// run by hand. The module's model must already be trained.
#[derive(FromArgs)]
#[argh(subcommand, name = "serve")]
/// run one module server in the foreground
struct ServeArgs {
    /// module id to serve
    #[argh(positional)]
    id: String,

    /// address to listen on
    #[argh(option, short = 'b', default = "\"127.0.0.1:12345\".into()")]
    bind: String,

    /// upper bound on a single run request in milliseconds
    #[argh(option, long = "request-timeout-ms")]
    request_timeout_ms: Option<u64>,
}

fn parse_args() -> std::result::Result<Cli, ExitCode> {
    let args: Vec<String> = std::env::args().collect();
    let command = args.first().map(|s| s.as_str()).unwrap_or("orthos");
    let rest: Vec<&str> = args.iter().skip(1).map(|s| s.as_str()).collect();

    Cli::from_args(&[command], &rest).map_err(|early| match early.status {
        Ok(()) => {
            println!("{}", early.output);
            ExitCode::SUCCESS
        }
        Err(()) => {
            eprintln!("{}", early.output);
            ExitCode::from(2)
        }
    })
}

fn init_tracing(debug: bool) {
    // RUST_LOG wins over the default level
    let default = if debug { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match parse_args() {
        Ok(cli) => cli,
        Err(code) => return code,
    };
    init_tracing(matches!(&cli.command, Commands::Run(args) if args.debug));

    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn execute(cli: Cli) -> Result<()> {
    let corrector = Corrector::from_file(&cli.config)?;
    let ids = |ids: &Option<String>| commands::parse_ids(ids.as_deref());

    match cli.command {
        Commands::Reset(args) => {
            let parameters = RunParameters::default();
            commands::lifecycle(&corrector, Stage::Reset, &ids(&args.ids), &parameters).await
        }
        Commands::Train(args) => {
            let parameters = stage_parameters(&args.params)?;
            commands::lifecycle(&corrector, Stage::Train, &ids(&args.ids), &parameters).await
        }
        Commands::Test(args) => {
            let parameters = stage_parameters(&args.params)?;
            commands::lifecycle(&corrector, Stage::Test, &ids(&args.ids), &parameters).await
        }
        Commands::Tune(args) => {
            let parameters = stage_parameters(&args.params)?;
            commands::lifecycle(&corrector, Stage::Tune, &ids(&args.ids), &parameters).await
        }
        Commands::Run(args) => {
            let parameters = run_parameters(&args)?;
            commands::run(
                &corrector,
                &args.document,
                &ids(&args.ids),
                &parameters,
                args.output.as_deref(),
            )
            .await
        }
        Commands::Evaluate(args) => {
            commands::evaluate(&corrector, &args.document, &args.reference, &ids(&args.ids)).await
        }
        Commands::StartServers(args) => {
            commands::start_servers(&corrector, &cli.config, &ids(&args.ids), args.host).await
        }
        Commands::StopServers(args) => {
            commands::stop_servers(&corrector, &ids(&args.ids), args.force, args.host.as_deref()).await
        }
        Commands::ListServers(_) => commands::list_servers(&corrector).await,
        Commands::Serve(args) => {
            commands::serve(&corrector, &args.id, &args.bind, args.request_timeout_ms).await
        }
    }
}

/// `-p key=value` pairs for train, test and tune.
fn stage_parameters(params: &[String]) -> Result<RunParameters> {
    RunParameters::default()
        .with_extra(params)
        .map_err(anyhow::Error::msg)
}

fn run_parameters(args: &RunArgs) -> Result<RunParameters> {
    let parameters = RunParameters {
        force_local: args.local,
        threads: args.threads,
        timeout_ms: args.timeout_ms,
        debug: args.debug,
        ..RunParameters::default()
    };
    parameters.with_extra(&args.params).map_err(anyhow::Error::msg)
}
