use std::env;
use std::path::Path;
use std::process::ExitCode;

use ctxpipe_context::{ContextPipeline, ContextRequest};
use ctxpipe_core::config::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "Usage: ctxpipe <command> [args...]

Commands:
  run <query> [--compress|-c] [-k N] [--max-tokens N]
                      print context for a query, compressed only with -c
                      (indexes on first run)
  index [--force]     index the workspace
  search <query> [-k N]
                      list matching chunks without compression
  compact             drop chunks left behind by changed files
  help                show this message";

#[derive(Debug, PartialEq)]
enum Command {
    Run { query: String, compress: bool, k: Option<usize>, max_tokens: Option<usize> },
    Index { force: bool },
    Search { query: String, k: Option<usize> },
    Compact,
    Help,
}

fn parse_args(mut args: Vec<String>) -> Result<Command, String> {
    if args.is_empty() {
        return Err("missing command".into());
    }
    let cmd = args.remove(0);
    let mut words = Vec::new();
    let mut compress = false;
    let mut force = false;
    let mut k = None;
    let mut max_tokens = None;
    let mut it = args.into_iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--compress" | "-c" => compress = true,
            "--force" | "-f" => force = true,
            "-k" | "--k" => k = Some(number(&arg, it.next())?),
            "--max-tokens" => max_tokens = Some(number(&arg, it.next())?),
            "-h" | "--help" => return Ok(Command::Help),
            flag if flag.starts_with('-') && flag.len() > 1 => {
                return Err(format!("unknown option '{flag}'"))
            }
            _ => words.push(arg),
        }
    }
    let query = words.join(" ");
    match cmd.as_str() {
        "run" if !query.trim().is_empty() => Ok(Command::Run { query, compress, k, max_tokens }),
        "search" if !query.trim().is_empty() => Ok(Command::Search { query, k }),
        "run" | "search" => Err(format!("'{cmd}' needs a query")),
        "index" => Ok(Command::Index { force }),
        "compact" => Ok(Command::Compact),
        "help" | "-h" | "--help" => Ok(Command::Help),
        other => Err(format!("unknown command '{other}'")),
    }
}

fn number(flag: &str, value: Option<String>) -> Result<usize, String> {
    let value = value.ok_or_else(|| format!("{flag} needs a value"))?;
    value.parse().map_err(|_| format!("{flag} expects a non-negative integer, got '{value}'"))
}

/// `run` compresses only when `-c` was given, whatever the configured default.
fn run_request(
    mut request: ContextRequest,
    compress: bool,
    k: Option<usize>,
    max_tokens: Option<usize>,
) -> ContextRequest {
    request.compress = Some(compress);
    if let Some(k) = k {
        request.k = k;
    }
    if let Some(max_tokens) = max_tokens {
        request.max_tokens = max_tokens;
    }
    request
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,ctxpipe=info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn file_name(source: &str) -> String {
    Path::new(source)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| source.to_string())
}

fn print_index_summary(pipeline: &ContextPipeline, force: bool) -> anyhow::Result<()> {
    println!("Indexing {} ...", pipeline.root().display());
    let summary = pipeline.index_workspace(force)?;
    println!(
        "✅ Indexed {} files ({} unchanged): {} new chunks, {} total",
        summary.files_indexed, summary.files_unchanged, summary.chunks_added, summary.total_chunks
    );
    for skipped in &summary.skipped {
        println!("⚠️  skipped {}: {}", skipped.path.display(), skipped.reason);
    }
    Ok(())
}

fn execute(command: Command) -> anyhow::Result<()> {
    let config = Config::load()?;
    let pipeline = ContextPipeline::new(config.settings()?)?;
    match command {
        Command::Run { query, compress, k, max_tokens } => {
            if pipeline.is_empty()? {
                info!("index is empty, indexing workspace first");
                print_index_summary(&pipeline, false)?;
            }
            let request = run_request(pipeline.default_request(), compress, k, max_tokens);
            let result = pipeline.get_context_with(&query, &request)?;
            if result.is_empty() {
                println!("No relevant context found.");
                return Ok(());
            }
            let sources: Vec<String> = result.sources.iter().map(|s| file_name(s)).collect();
            println!("📁 Sources: {}", sources.join(", "));
            println!(
                "📊 Stats: {} → {} tokens ({:.0}% saved)",
                result.stats.origin_tokens, result.stats.compressed_tokens, result.stats.savings_pct
            );
            println!("{}", "-".repeat(60));
            println!("{}", result.context);
        }
        Command::Index { force } => print_index_summary(&pipeline, force)?,
        Command::Search { query, k } => {
            let k = k.unwrap_or(pipeline.settings().retrieval.k);
            let results = pipeline.search(&query, k)?;
            if results.is_empty() {
                println!("No results.");
            }
            for (rank, r) in results.iter().enumerate() {
                let preview: String = r.chunk.text.chars().take(160).collect();
                println!(
                    "{}. [{:.3}] {} (word {})\n   {}",
                    rank + 1,
                    r.score,
                    file_name(&r.chunk.source),
                    r.chunk.start_offset,
                    preview
                );
            }
        }
        Command::Compact => {
            let removed = pipeline.compact()?;
            println!("🧹 Removed {} stale chunks, {} remain", removed, pipeline.total_chunks()?);
        }
        Command::Help => println!("{USAGE}"),
    }
    Ok(())
}

fn main() -> ExitCode {
    init_logging();
    let command = match parse_args(env::args().skip(1).collect()) {
        Ok(command) => command,
        Err(msg) => {
            eprintln!("Error: {msg}\n\n{USAGE}");
            return ExitCode::from(2);
        }
    };
    if command == Command::Help {
        println!("{USAGE}");
        return ExitCode::SUCCESS;
    }
    match execute(command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctxpipe_core::config::Settings;

    fn args(s: &[&str]) -> Vec<String> {
        s.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn run_collects_query_and_flags() {
        let cmd = parse_args(args(&["run", "agent", "constraints", "-c", "-k", "3"])).unwrap();
        let expected = Command::Run {
            query: "agent constraints".into(),
            compress: true,
            k: Some(3),
            max_tokens: None,
        };
        assert_eq!(cmd, expected);
    }

    #[test]
    fn run_compresses_only_with_flag() {
        let cmd = parse_args(args(&["run", "agent", "--max-tokens", "500"])).unwrap();
        let Command::Run { compress, k, max_tokens, .. } = cmd else {
            panic!("expected run, got {cmd:?}");
        };
        assert!(!compress);

        let settings = Settings::default();
        assert!(settings.compression.enabled);
        let defaults = ContextRequest::from_settings(&settings);
        let plain = run_request(defaults.clone(), compress, k, max_tokens);
        assert_eq!(plain.compress, Some(false));
        assert_eq!(plain.max_tokens, 500);
        assert_eq!(plain.k, defaults.k);
        assert_eq!(run_request(defaults, true, Some(2), None).compress, Some(true));
    }

    #[test]
    fn usage_errors() {
        assert!(parse_args(vec![]).is_err());
        assert!(parse_args(args(&["run"])).is_err());
        assert!(parse_args(args(&["run", "q", "-k"])).is_err());
        assert!(parse_args(args(&["run", "q", "-k", "many"])).is_err());
        assert!(parse_args(args(&["frobnicate"])).is_err());
        assert!(parse_args(args(&["index", "--bogus"])).is_err());
    }

    #[test]
    fn help_and_index() {
        assert_eq!(parse_args(args(&["--help"])).unwrap(), Command::Help);
        assert_eq!(parse_args(args(&["run", "-h"])).unwrap(), Command::Help);
        let index = parse_args(args(&["index", "--force"])).unwrap();
        assert_eq!(index, Command::Index { force: true });
    }
}
