//! `logshift` command-line front end

use anyhow::{bail, Context, Result};
use clap::parser::ValueSource;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use logshift_backup::{generate_rollback_script, BackupStore};
use logshift_core::{EngineConfig, Orchestrator, ProgressKind};
use logshift_transform::{classify_explained, ComponentTag};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

fn project_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("root")
            .long("root")
            .default_value(".")
            .value_parser(value_parser!(PathBuf))
            .help("Project root"),
    )
    .arg(
        Arg::new("config")
            .long("config")
            .value_parser(value_parser!(PathBuf))
            .help("Config file (default: <root>/logshift.toml if present)"),
    )
}

fn run_dir_arg() -> Arg {
    Arg::new("run-dir")
        .long("run-dir")
        .required(true)
        .value_parser(value_parser!(PathBuf))
        .help("Backup directory of the run")
}

fn cli() -> Command {
    Command::new("logshift")
        .version(logshift_core::VERSION)
        .about("Migrate direct console output to the component logger")
        .subcommand_required(true)
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            project_args(Command::new("run").about("Run the full migration pipeline"))
                .arg(
                    Arg::new("dry-run")
                        .long("dry-run")
                        .action(ArgAction::SetTrue)
                        .help("Transform in memory only; no backups, writes or tests"),
                )
                .arg(
                    Arg::new("workers")
                        .long("workers")
                        .value_parser(value_parser!(usize))
                        .help("Files processed concurrently"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the final report as JSON"),
                ),
        )
        .subcommand(
            project_args(Command::new("analyze").about("Count files and output calls per component"))
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the analysis as JSON"),
                ),
        )
        .subcommand(
            Command::new("classify")
                .about("Show the component each path belongs to")
                .arg(
                    Arg::new("paths")
                        .required(true)
                        .num_args(1..)
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new("rollback")
                .about("Restore files from a run's backups")
                .arg(run_dir_arg())
                .arg(
                    Arg::new("component")
                        .long("component")
                        .action(ArgAction::Append)
                        .help("Restrict to this component (repeatable)"),
                ),
        )
        .subcommand(
            Command::new("script")
                .about("Print the shell rollback script of a run")
                .arg(run_dir_arg()),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(args: &ArgMatches) -> Result<EngineConfig> {
    let root = args
        .get_one::<PathBuf>("root")
        .cloned()
        .unwrap_or_else(|| PathBuf::from("."));
    let mut config = match args.get_one::<PathBuf>("config") {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::discover(&root)
            .with_context(|| format!("loading config under {}", root.display()))?,
    };
    if args.value_source("root") == Some(ValueSource::CommandLine) {
        config.project_root = root;
    }
    Ok(config)
}

async fn cmd_run(args: &ArgMatches) -> Result<bool> {
    let mut config = load_config(args)?;
    config.dry_run |= args.get_flag("dry-run");
    if let Some(workers) = args.get_one::<usize>("workers") {
        config.max_workers = *workers;
    }

    let orchestrator = Orchestrator::new(config);
    let mut events = orchestrator.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            };
            let state = &event.state;
            match event.kind {
                ProgressKind::StageChanged => eprintln!("[{}] {:>5.1}%", state.stage, state.progress_percent()),
                ProgressKind::ComponentFinished => {
                    if let Some(component) = state.current_component {
                        eprintln!("  {component} done ({}/{} files)", state.processed_files, state.total_files);
                    }
                }
                ProgressKind::FileProcessed => eprintln!(
                    "  {}/{} files, {}/{} calls",
                    state.processed_files, state.total_files, state.processed_calls, state.total_calls
                ),
            }
            if state.stage.is_terminal() {
                break;
            }
        }
    });

    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; finishing in-flight files");
            cancel.cancel();
        }
    });

    let outcome = orchestrator.run().await.context("migration run")?;
    let _ = printer.await;
    let report = &outcome.report;

    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!("status:       {}", report.status);
        println!("files:        {} migrated, {} skipped", report.summary.migrated_files, report.summary.skipped_files);
        println!("replacements: {}", report.summary.total_replacements);
        println!("warnings:     {}", report.warnings.len());
        for error in &report.errors {
            println!("error:        {error}");
        }
        if let Some(rec) = &report.rollback_recommendation {
            println!("rollback:     {}", rec.reason);
            if let Some(command) = &rec.command {
                println!("              {command}");
            }
        }
        println!("report:       {}", outcome.report_path.display());
    }
    Ok(report.succeeded())
}

async fn cmd_analyze(args: &ArgMatches) -> Result<()> {
    let config = load_config(args)?;
    let report = Orchestrator::new(config).analyze().await.context("analysis")?;
    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!("{:<14}{:>8}{:>8}", "component", "files", "calls");
    for (component, files) in &report.files_by_component {
        let calls = report.calls_by_component.get(component).copied().unwrap_or(0);
        println!("{:<14}{files:>8}{calls:>8}", component.to_string());
    }
    println!("{:<14}{:>8}{:>8}", "total", report.total_files, report.total_calls);
    for file in &report.defaulted_files {
        println!("defaulted to Core: {file}");
    }
    println!("estimated duration: {} ms", report.estimated_duration_ms);
    Ok(())
}

fn cmd_classify(args: &ArgMatches) {
    for path in args.get_many::<PathBuf>("paths").into_iter().flatten() {
        let classification = classify_explained(path);
        match classification.rule {
            Some(rule) => println!("{}\t{}\t(matched {rule})", path.display(), classification.tag),
            None => println!("{}\t{}\t(default)", path.display(), classification.tag),
        }
    }
}

fn open_store(args: &ArgMatches) -> Result<BackupStore> {
    let run_dir = args
        .get_one::<PathBuf>("run-dir")
        .map(PathBuf::as_path)
        .unwrap_or(Path::new("."));
    BackupStore::open(run_dir).with_context(|| format!("opening backups in {}", run_dir.display()))
}

fn cmd_rollback(args: &ArgMatches) -> Result<()> {
    let store = open_store(args)?;
    let components = args
        .get_many::<String>("component")
        .into_iter()
        .flatten()
        .map(|c| c.parse::<ComponentTag>())
        .collect::<Result<Vec<_>, _>>()?;

    let restored = if components.is_empty() {
        store.restore_all().context("restoring all files")?
    } else {
        let mut restored = Vec::new();
        for component in components {
            restored.extend(
                store
                    .restore_component(component)
                    .with_context(|| format!("restoring {component}"))?,
            );
        }
        restored
    };
    for path in &restored {
        println!("restored {}", path.display());
    }
    println!("{} file(s) restored from run {}", restored.len(), store.run_id());
    Ok(())
}

fn cmd_script(args: &ArgMatches) -> Result<()> {
    let store = open_store(args)?;
    print!("{}", generate_rollback_script(&store.run_id(), &store.entries()));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    match matches.subcommand() {
        Some(("run", args)) => {
            if !cmd_run(args).await? {
                std::process::exit(1);
            }
        }
        Some(("analyze", args)) => cmd_analyze(args).await?,
        Some(("classify", args)) => cmd_classify(args),
        Some(("rollback", args)) => cmd_rollback(args)?,
        Some(("script", args)) => cmd_script(args)?,
        Some((other, _)) => bail!("unknown command {other}"),
        None => bail!("no command given"),
    }
    Ok(())
}
