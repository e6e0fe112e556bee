//! Built-in CLI (spec §6 exit codes): a query-only entry point against an
//! already-populated `DATA_DIR`, kept as its own binary per the teacher's
//! multi-binary convention (`focusengine` for the server, `focusengine-cli`
//! for one-shot operations).

use std::process::ExitCode;

use focusengine::core::types::EmbedderState;
use focusengine::{AppState, Config};

const EXIT_OK: u8 = 0;
const EXIT_INVALID_ARGS: u8 = 2;
const EXIT_MISSING_INDEX: u8 = 3;
const EXIT_EMBEDDER_UNAVAILABLE: u8 = 4;

enum Command {
    Search { query: String, limit: usize, use_llm: bool, model: Option<String> },
    EmbedderStatus,
    EmbedderEnsure { model: Option<String> },
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Command, String> {
    let sub = args.next().ok_or("missing subcommand: search|embedder-status|embedder-ensure")?;
    match sub.as_str() {
        "search" => {
            let mut query: Option<String> = None;
            let mut limit = 10usize;
            let mut use_llm = false;
            let mut model = None;
            while let Some(arg) = args.next() {
                match arg.as_str() {
                    "--limit" => {
                        limit = args
                            .next()
                            .ok_or("--limit requires a value")?
                            .parse()
                            .map_err(|_| "--limit must be a number".to_string())?;
                    }
                    "--llm" => use_llm = true,
                    "--model" => model = Some(args.next().ok_or("--model requires a value")?),
                    other if query.is_none() => query = Some(other.to_string()),
                    other => return Err(format!("unexpected argument: {other}")),
                }
            }
            let query = query.ok_or("search requires a query argument")?;
            Ok(Command::Search { query, limit, use_llm, model })
        }
        "embedder-status" => Ok(Command::EmbedderStatus),
        "embedder-ensure" => {
            let mut model = None;
            while let Some(arg) = args.next() {
                match arg.as_str() {
                    "--model" => model = Some(args.next().ok_or("--model requires a value")?),
                    other => return Err(format!("unexpected argument: {other}")),
                }
            }
            Ok(Command::EmbedderEnsure { model })
        }
        other => Err(format!("unknown subcommand: {other}")),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let command = match parse_args(std::env::args().skip(1)) {
        Ok(cmd) => cmd,
        Err(msg) => {
            eprintln!("error: {msg}");
            return ExitCode::from(EXIT_INVALID_ARGS);
        }
    };

    let config = Config::from_env();
    if !config.paths.index_dir.exists() {
        eprintln!("error: index directory does not exist: {}", config.paths.index_dir.display());
        return ExitCode::from(EXIT_MISSING_INDEX);
    }

    let state = match AppState::new(config).await {
        Ok(state) => state,
        Err(e) => {
            eprintln!("error: failed to initialize: {e}");
            return ExitCode::from(EXIT_MISSING_INDEX);
        }
    };

    match command {
        Command::Search { query, limit, use_llm, model } => {
            let response = state.search_service.run_query(&query, limit, use_llm, model).await;
            println!("{}", serde_json::to_string_pretty(&response).unwrap_or_default());
            ExitCode::from(EXIT_OK)
        }
        Command::EmbedderStatus => {
            let status = state.embedder.status().await;
            println!("{}", serde_json::to_string_pretty(&status).unwrap_or_default());
            if status.state == EmbedderState::Error {
                ExitCode::from(EXIT_EMBEDDER_UNAVAILABLE)
            } else {
                ExitCode::from(EXIT_OK)
            }
        }
        Command::EmbedderEnsure { model } => {
            let status = state.embedder.ensure(model).await;
            println!("{}", serde_json::to_string_pretty(&status).unwrap_or_default());
            if status.state == EmbedderState::Error {
                ExitCode::from(EXIT_EMBEDDER_UNAVAILABLE)
            } else {
                ExitCode::from(EXIT_OK)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_search_requires_query() {
        let err = parse_args(vec!["search".to_string()].into_iter()).unwrap_err();
        assert!(err.contains("query"));
    }

    #[test]
    fn parse_search_reads_flags() {
        let cmd = parse_args(
            vec!["search".to_string(), "rust async".to_string(), "--limit".to_string(), "5".to_string(), "--llm".to_string()]
                .into_iter(),
        )
        .unwrap();
        match cmd {
            Command::Search { query, limit, use_llm, .. } => {
                assert_eq!(query, "rust async");
                assert_eq!(limit, 5);
                assert!(use_llm);
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn parse_unknown_subcommand_errors() {
        assert!(parse_args(vec!["bogus".to_string()].into_iter()).is_err());
    }
}
