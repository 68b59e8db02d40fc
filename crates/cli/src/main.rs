//! Delve command-line runner.
//!
//! Usage:
//!   delve "Effects of caffeine on sleep"
//!   delve --config delve.toml "Effects of caffeine on sleep"
//!
//! Prints the markdown report on stdout. A failed session exits non-zero
//! with its failure reason.
//!
//! # Environment Variables
//!
//! - `OPENAI_API_KEY` - model API key when `[llm] api_key` is not set
//! - `RUST_LOG` - log filter (default: `info,delve=debug`)

use std::path::PathBuf;

use delve_orchestrator::{DelveConfig, Orchestrator};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_CONFIG: &str = "delve.toml";

#[derive(Debug, PartialEq)]
enum Command {
    Run {
        config: Option<PathBuf>,
        topic: String,
    },
    Help,
}

fn parse_args(args: &[String]) -> anyhow::Result<Command> {
    let mut config = None;
    let mut words = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                let Some(path) = args.get(i + 1) else {
                    anyhow::bail!("--config needs a file path");
                };
                config = Some(PathBuf::from(path));
                i += 1;
            }
            "--help" | "-h" => return Ok(Command::Help),
            flag if flag.starts_with('-') && flag.len() > 1 => {
                anyhow::bail!("unknown option: {flag}");
            }
            word => words.push(word.to_string()),
        }
        i += 1;
    }

    let topic = words.join(" ");
    if topic.trim().is_empty() {
        anyhow::bail!("no research topic given (see --help)");
    }
    Ok(Command::Run { config, topic })
}

fn print_help() {
    println!("Delve research assistant");
    println!();
    println!("Usage: delve [OPTIONS] <TOPIC>...");
    println!();
    println!("Options:");
    println!("  -c, --config <FILE>  Path to config file (default: ./{DEFAULT_CONFIG} if present)");
    println!("  -h, --help           Show this help message");
    println!();
    println!("Environment variables:");
    println!("  OPENAI_API_KEY       Model API key when not set in the config file");
    println!("  RUST_LOG             Log filter (default: info,delve=debug)");
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<DelveConfig> {
    let path = path.or_else(|| {
        let default = PathBuf::from(DEFAULT_CONFIG);
        default.exists().then_some(default)
    });

    match path {
        Some(path) => {
            tracing::info!(path = %path.display(), "Loading configuration");
            DelveConfig::from_file(&path)
        }
        None => {
            tracing::info!("Using default configuration");
            Ok(DelveConfig::default())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,delve=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (config_path, topic) = match parse_args(&args)? {
        Command::Help => {
            print_help();
            return Ok(());
        }
        Command::Run { config, topic } => (config, topic),
    };

    let config = load_config(config_path)?;
    let orchestrator = Orchestrator::from_config(&config)?;

    let handle = orchestrator.start(&topic)?;
    let recorder = handle.recorder().clone();

    let cancel = handle.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling session");
            cancel.cancel();
        }
    });

    let outcome = handle.join().await;

    match recorder.summary() {
        Ok(summary) => tracing::info!(session_id = %recorder.session_id(), "{summary}"),
        Err(e) => tracing::warn!(error = %e, "Could not summarize the session trace"),
    }
    match orchestrator.long_term().stats().await {
        Ok(stats) => tracing::info!(
            total = stats.total_entries,
            backend = %stats.backend,
            embedder = %stats.embedder,
            "Long-term memory"
        ),
        Err(e) => tracing::warn!(error = %e, "Could not read long-term memory stats"),
    }

    let report = outcome?;
    println!("{}", report.to_markdown());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn topic_words_are_joined() {
        let cmd = parse_args(&args(&["Effects", "of", "caffeine"])).unwrap();
        assert_eq!(
            cmd,
            Command::Run {
                config: None,
                topic: "Effects of caffeine".into()
            }
        );
    }

    #[test]
    fn config_flag_takes_path() {
        let cmd = parse_args(&args(&["-c", "conf/delve.toml", "sleep"])).unwrap();
        assert_eq!(
            cmd,
            Command::Run {
                config: Some(PathBuf::from("conf/delve.toml")),
                topic: "sleep".into()
            }
        );
    }

    #[test]
    fn missing_topic_is_an_error() {
        assert!(parse_args(&args(&["--config", "delve.toml"])).is_err());
        assert!(parse_args(&args(&["--config"])).is_err());
    }

    #[test]
    fn unknown_flag_is_an_error() {
        assert!(parse_args(&args(&["--verbose", "topic"])).is_err());
    }

    #[test]
    fn help_wins() {
        assert_eq!(parse_args(&args(&["topic", "--help"])).unwrap(), Command::Help);
    }
}
