use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sieve_core::{Event, ExecutionOutcome, MetadataMap, SandboxConfig};
use sieve_kernel::TransformEngine;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Sieve CLI
/// Runs transformation scripts against event batches in V8 sandboxes
#[derive(Parser)]
#[command(name = "sieve", version)]
#[command(about = "Sandboxed event transformation engine", long_about = None)]
struct Cli {
    /// JSON file with sandbox configuration (overrides environment)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a local script against a batch of events
    Exec {
        #[arg(short, long)]
        script: PathBuf,
        #[arg(short, long)]
        events: PathBuf,
        /// JSON object mapping messageId to metadata
        #[arg(short, long)]
        metadata: Option<PathBuf>,
        /// Library sources, compiled in the order given
        #[arg(short, long)]
        library: Vec<PathBuf>,
    },
    /// Compile a script and report its entry point
    Check {
        #[arg(short, long)]
        script: PathBuf,
        #[arg(short, long)]
        library: Vec<PathBuf>,
    },
    /// Run a published transformation version from the config backend
    Run {
        #[arg(long)]
        version_id: String,
        #[arg(short, long)]
        events: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    info!(
        "⚡ Sieve CLI v{} (core {})",
        env!("CARGO_PKG_VERSION"),
        sieve_core::SIEVE_CORE_VERSION
    );

    let engine = match &cli.config {
        Some(path) => {
            let config: SandboxConfig = read_json(path)?;
            let provider = sieve_kernel::HttpSourceProvider::new(&config.config_backend_url)?;
            let transport = sieve_kernel::HttpFetchTransport::new()?;
            TransformEngine::new(config, std::sync::Arc::new(provider), std::sync::Arc::new(transport))?
        }
        None => TransformEngine::from_env()?,
    };

    let code = match cli.command {
        Commands::Exec {
            script,
            events,
            metadata,
            library,
        } => {
            let code = read_source(&script)?;
            let library = read_libraries(&library)?;
            let events: Vec<Event> = read_json(&events)?;
            let metadata: Option<MetadataMap> = metadata.as_deref().map(read_json).transpose()?;

            info!("🚀 Executing {} on {} events", script.display(), events.len());
            let outcome = engine
                .run_user_code(&events, &code, library.as_deref(), metadata)
                .await?;
            report(&outcome)?
        }
        Commands::Check { script, library } => {
            let code = read_source(&script)?;
            let library = read_libraries(&library)?;
            let entry = engine.check_code(&code, library.as_deref()).await?;
            println!("{}", serde_json::json!({ "entry": entry.name() }));
            ExitCode::SUCCESS
        }
        Commands::Run { version_id, events } => {
            let events: Vec<Event> = read_json(&events)?;
            info!("🚀 Running version {} on {} events", version_id, events.len());
            let outcome = engine.user_transform_handler(&events, Some(&version_id)).await?;
            report(&outcome)?
        }
    };

    engine.shutdown();
    Ok(code)
}

fn report(outcome: &ExecutionOutcome) -> Result<ExitCode> {
    println!("{}", serde_json::to_string_pretty(outcome)?);
    Ok(if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

fn read_source(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

/// Concatenate library files in order; `None` when there are none
fn read_libraries(paths: &[PathBuf]) -> Result<Option<String>> {
    if paths.is_empty() {
        return Ok(None);
    }
    let sources = paths
        .iter()
        .map(|path| read_source(path))
        .collect::<Result<Vec<_>>>()?;
    Ok(Some(sources.join("\n;\n")))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = read_source(path)?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn events_file_is_parsed_into_a_batch() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{ "message": {{ "messageId": "m1" }}, "metadata": {{ "sourceId": "s" }} }}]"#
        )
        .unwrap();

        let events: Vec<Event> = read_json(file.path()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message_id(), Some("m1"));
    }

    #[test]
    fn libraries_are_joined_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.js");
        let second = dir.path().join("b.js");
        std::fs::write(&first, "var a = 1;").unwrap();
        std::fs::write(&second, "var b = a + 1;").unwrap();

        let joined = read_libraries(&[first, second]).unwrap().unwrap();
        assert!(joined.find("var a").unwrap() < joined.find("var b").unwrap());
        assert_eq!(read_libraries(&[]).unwrap(), None);
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = read_source(Path::new("/nonexistent/transform.js")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/transform.js"));
    }
}
