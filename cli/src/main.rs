use clap::Parser;
use gitkeeper_cli::commands::{cli, run};
use gitkeeper_cli::session::Session;
use gitkeeper_core::error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

static LOG_GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
    std::sync::OnceLock::new();

// The scheduler owns its worker runtime, so main stays synchronous.
fn main() {
    let exit = match real_main() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e}");
            exit_code_for_error(&e)
        }
    };

    std::process::exit(exit);
}

fn real_main() -> Result<i32, error::CliError> {
    let args = cli::Args::parse();
    let cfg = gitkeeper_core::config::load_default()
        .map_err(|e| error::CliError::Config(e.to_string()))?;
    init_tracing(&cfg.logging).map_err(error::CliError::Config)?;

    let session = Session::new(cfg, !args.no_progress && !args.json)?;
    let result = run::dispatch(args, &session);
    session.shutdown();
    result
}

fn exit_code_for_error(e: &error::CliError) -> i32 {
    // 0: success
    // 11: config error
    // 20: process / IO error
    // 30: task fault
    // 130: canceled
    match e {
        error::CliError::Config(_) => 11,
        error::CliError::Task(te) => te.exit_code(),
        error::CliError::Watcher(_) => 20,
        error::CliError::Io(_) => 20,
        error::CliError::Command(_) => 20,
        error::CliError::Anyhow(_) => 30,
    }
}

fn init_tracing(logging: &gitkeeper_core::config::LoggingConfig) -> Result<(), String> {
    if !logging.enabled {
        return Ok(());
    }

    let filter = match std::env::var("RUST_LOG") {
        Ok(v) if !v.trim().is_empty() => EnvFilter::from_default_env(),
        _ => EnvFilter::try_new(logging.level.clone()).map_err(|e| e.to_string())?,
    };

    let mut maybe_writer = None;

    if logging.file {
        let dir = match logging
            .directory
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            Some(d) => std::path::PathBuf::from(d),
            None => std::env::temp_dir().join("gitkeeper"),
        };

        std::fs::create_dir_all(&dir).map_err(|e| format!("create log dir failed: {e}"))?;
        let file_name = format!("gitkeeper.{}.log", std::process::id());
        let appender = tracing_appender::rolling::never(dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        let _ = LOG_GUARD.set(guard);
        maybe_writer = Some(non_blocking);
    }

    if !logging.console && maybe_writer.is_none() {
        return Err("logging disabled for both console and file".to_string());
    }

    let console_layer = logging.console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(atty::is(atty::Stream::Stderr))
    });

    let file_layer = maybe_writer.map(|w| {
        tracing_subscriber::fmt::layer()
            .with_writer(w)
            .with_ansi(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(())
}
