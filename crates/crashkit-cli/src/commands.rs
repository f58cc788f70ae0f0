use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;
use serde_json::json;
use tracing::{info, warn};

use crashkit_mover::{CrashMover, MoverConfig, Submissions};
use crashkit_store::{open_store, BackendConfig, CrashStore};
use crashkit_types::{CrashId, DumpMap, ProcessedCrash, RawCrash, DEFAULT_DEPTH, DEFAULT_DUMP_NAME};

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let format = cli.format;
    let store = cli.store;
    match cli.command {
        Command::Move(args) => cmd_move(args, format),
        Command::Save(args) => cmd_save(&*open_configured(store.as_deref())?, args, format),
        Command::Get(args) => cmd_get(&*open_configured(store.as_deref())?, args, format),
        Command::Remove(args) => cmd_remove(&*open_configured(store.as_deref())?, args, format),
        Command::ListNew(args) => cmd_list_new(&*open_configured(store.as_deref())?, args, format),
        Command::NewId(args) => cmd_new_id(args, format),
        Command::Config(args) => cmd_config(store.as_deref(), args, format),
    }
}

/// Read a store description, or fall back to the default dated radix store.
fn load_backend(path: Option<&Path>) -> anyhow::Result<BackendConfig> {
    let Some(path) = path else {
        return Ok(BackendConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read store config {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("invalid store config {}", path.display()))
}

fn open_configured(path: Option<&Path>) -> anyhow::Result<Arc<dyn CrashStore>> {
    let config = load_backend(path)?;
    Ok(open_store(&config)?)
}

fn parse_id(raw: &str) -> anyhow::Result<CrashId> {
    CrashId::parse(raw).with_context(|| format!("bad crash id {raw:?}"))
}

/// `NAME=PATH` or a bare `PATH` for the default dump.
fn parse_dump_arg(arg: &str) -> (String, PathBuf) {
    match arg.split_once('=') {
        Some((name, path)) if !name.is_empty() && !name.contains('/') => {
            (name.to_string(), PathBuf::from(path))
        }
        _ => (DEFAULT_DUMP_NAME.to_string(), PathBuf::from(arg)),
    }
}

fn read_json_object(path: &Path) -> anyhow::Result<serde_json::Map<String, serde_json::Value>> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    match serde_json::from_str(&text).with_context(|| format!("{} is not JSON", path.display()))? {
        serde_json::Value::Object(map) => Ok(map),
        _ => anyhow::bail!("{} must hold a JSON object", path.display()),
    }
}

fn today() -> chrono::NaiveDate {
    chrono::Utc::now().date_naive()
}

fn cmd_move(args: MoveArgs, format: OutputFormat) -> anyhow::Result<()> {
    let mut config = MoverConfig::load(&args.config)?;
    if let Some(submissions) = &args.submissions {
        config.number_of_submissions = submissions.parse::<Submissions>()?;
    }
    if let Some(threads) = args.threads {
        config.tasks.number_of_threads = threads;
    }

    let mover = CrashMover::from_config(&config)?;
    let mut engine = mover.engine()?;
    let stop = engine.stop_handle();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("cannot start signal runtime")?;
    let stats = runtime.block_on(async move {
        engine.start()?;
        let mut waiter = tokio::task::spawn_blocking(move || engine.wait_for_completion());
        let joined = tokio::select! {
            joined = &mut waiter => joined,
            () = shutdown_signal() => {
                info!("shutdown requested, letting workers finish");
                stop.stop();
                waiter.await
            }
        };
        anyhow::Ok(joined.context("engine waiter panicked")??)
    })?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
        OutputFormat::Text => {
            let mark = if stats.failed == 0 { "✓".green().bold() } else { "!".yellow().bold() };
            println!(
                "{} Moved {} crashes ({} dispatched, {} failed)",
                mark,
                stats.succeeded.to_string().bold(),
                stats.dispatched,
                stats.failed.to_string().red()
            );
        }
    }
    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

fn cmd_save(store: &dyn CrashStore, args: SaveArgs, format: OutputFormat) -> anyhow::Result<()> {
    let id = match &args.id {
        Some(raw) => parse_id(raw)?,
        None => CrashId::generate(today(), DEFAULT_DEPTH)?,
    };
    let raw: RawCrash = match &args.raw {
        Some(path) => read_json_object(path)?,
        None => RawCrash::new(),
    };
    let mut dumps = DumpMap::new();
    for arg in &args.dumps {
        let (name, path) = parse_dump_arg(arg);
        let data = std::fs::read(&path).with_context(|| format!("cannot read {}", path.display()))?;
        if dumps.insert(name.clone(), data).is_some() {
            anyhow::bail!("dump {name:?} given twice");
        }
    }

    match &args.processed {
        Some(path) => {
            let processed: ProcessedCrash = read_json_object(path)?;
            store.save_raw_and_processed(&id, &raw, &dumps, &processed)?;
        }
        None => store.save_raw(&id, &raw, &dumps)?,
    }

    match format {
        OutputFormat::Json => println!(
            "{}",
            json!({"id": id.as_str(), "dumps": dumps.names().collect::<Vec<_>>(), "bytes": dumps.total_bytes()})
        ),
        OutputFormat::Text => println!(
            "{} Saved {} ({} dumps, {} bytes)",
            "✓".green().bold(),
            id.as_str().yellow(),
            dumps.len(),
            dumps.total_bytes()
        ),
    }
    Ok(())
}

fn cmd_get(store: &dyn CrashStore, args: GetArgs, format: OutputFormat) -> anyhow::Result<()> {
    let id = parse_id(&args.id)?;

    if let Some(name) = &args.dump {
        let data = store.get_dump(&id, Some(name))?;
        match &args.output {
            Some(path) => {
                std::fs::write(path, &data)
                    .with_context(|| format!("cannot write {}", path.display()))?;
                eprintln!("{} Wrote {} bytes to {}", "✓".green(), data.len(), path.display());
            }
            None => std::io::stdout().lock().write_all(&data)?,
        }
        return Ok(());
    }

    if args.files {
        let files = store.get_dumps_as_files(&id)?;
        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&files)?),
            OutputFormat::Text => {
                for (name, path) in &files {
                    println!("{}  {}", name.cyan(), path.display());
                }
            }
        }
        return Ok(());
    }

    let (label, record) = if args.processed && args.unredacted {
        ("processed (unredacted)", store.get_unredacted_processed(&id)?)
    } else if args.processed {
        ("processed", store.get_processed(&id)?)
    } else {
        ("raw", store.get_raw(&id)?)
    };
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&record)?),
        OutputFormat::Text => {
            println!("Crash {} ({})", id.as_str().yellow().bold(), label);
            println!("{}", serde_json::to_string_pretty(&record)?);
            if !args.processed {
                let dumps = store.get_dumps(&id)?;
                for (name, data) in dumps.iter() {
                    println!("  {} {} bytes", name.cyan(), data.len());
                }
            }
        }
    }
    Ok(())
}

fn cmd_remove(store: &dyn CrashStore, args: RemoveArgs, format: OutputFormat) -> anyhow::Result<()> {
    let id = parse_id(&args.id)?;
    store.remove(&id)?;
    match format {
        OutputFormat::Json => println!("{}", json!({"removed": id.as_str()})),
        OutputFormat::Text => println!("{} Removed {}", "✓".green().bold(), id.as_str().yellow()),
    }
    Ok(())
}

fn cmd_list_new(store: &dyn CrashStore, args: ListNewArgs, format: OutputFormat) -> anyhow::Result<()> {
    let stream = store.enumerate_new()?;
    let ids: Vec<CrashId> = match args.limit {
        Some(limit) => stream.take(limit).collect(),
        None => stream.collect(),
    };
    match format {
        OutputFormat::Json => {
            let ids: Vec<&str> = ids.iter().map(CrashId::as_str).collect();
            println!("{}", serde_json::to_string(&ids)?);
        }
        OutputFormat::Text if ids.is_empty() => println!("No new crashes."),
        OutputFormat::Text => {
            for id in &ids {
                println!("{id}");
            }
        }
    }
    Ok(())
}

fn cmd_new_id(args: NewIdArgs, format: OutputFormat) -> anyhow::Result<()> {
    let id = CrashId::generate(args.date.unwrap_or_else(today), args.depth)?;
    match format {
        OutputFormat::Json => println!("{}", json!({"id": id.as_str()})),
        OutputFormat::Text => println!("{id}"),
    }
    Ok(())
}

fn cmd_config(store: Option<&Path>, args: ConfigArgs, format: OutputFormat) -> anyhow::Result<()> {
    let rendered = match (&args.mover, format) {
        (Some(path), OutputFormat::Json) => serde_json::to_string_pretty(&MoverConfig::load(path)?)?,
        (Some(path), OutputFormat::Text) => toml::to_string_pretty(&MoverConfig::load(path)?)?,
        (None, OutputFormat::Json) => serde_json::to_string_pretty(&load_backend(store)?)?,
        (None, OutputFormat::Text) => toml::to_string_pretty(&load_backend(store)?)?,
    };
    println!("{rendered}");
    Ok(())
}
