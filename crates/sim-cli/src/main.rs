//! CLI entry point for the `sim` binary.

use std::env;
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;

use serde as _;
use serde_json as _;
use sim_cli::{load_config, load_program, ProblemReporter, StdIo};
use sim_core::{Cpu, ReplExit, Sandbox, SimConfig, TracingListener};
#[cfg(test)]
use tempfile as _;
use thiserror as _;
use tracing::info;
use tracing_subscriber::EnvFilter;

const USAGE_TEXT: &str = "\
Usage: sim <command> [options]

Commands:
  run <program.json> [options]  Load a serialized program and run it
  repl                          Interactive annotation sandbox

Options:
  --tick-ms <n>        Tick period in milliseconds (default 0: unthrottled)
  --pipelined          Overlap stages, one tick per cycle
  --no-annotations     Skip sandbox dispatch for annotations
  --config <file>      JSON configuration; flags override its values
  -h, --help           Show this help message

Environment:
  RUST_LOG             Log filter for stderr diagnostics (default warn)

Examples:
  sim run program.json
  sim run program.json --tick-ms 50 --pipelined
  sim repl
";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Run(RunArgs),
    Repl,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct RunArgs {
    program: PathBuf,
    tick_ms: Option<u64>,
    pipelined: bool,
    no_annotations: bool,
    config: Option<PathBuf>,
}

#[derive(Debug)]
enum ParseResult {
    Command(Command),
    Help,
}

fn parse_args(mut args: impl Iterator<Item = OsString>) -> Result<ParseResult, String> {
    let first = args.next().ok_or_else(|| "missing command".to_string())?;

    if first == "--help" || first == "-h" {
        return Ok(ParseResult::Help);
    }

    match first.to_string_lossy().as_ref() {
        "run" => parse_run_args(args)
            .map(Command::Run)
            .map(ParseResult::Command),
        "repl" => match args.next() {
            None => Ok(ParseResult::Command(Command::Repl)),
            Some(arg) if arg == "--help" || arg == "-h" => Err(USAGE_TEXT.to_string()),
            Some(arg) => Err(format!("unexpected argument: {}", arg.to_string_lossy())),
        },
        other => Err(format!("unknown command: {other}")),
    }
}

#[allow(clippy::while_let_on_iterator)]
fn parse_run_args(mut args: impl Iterator<Item = OsString>) -> Result<RunArgs, String> {
    let mut program: Option<PathBuf> = None;
    let mut parsed = RunArgs::default();

    while let Some(arg) = args.next() {
        if arg == "--help" || arg == "-h" {
            return Err(USAGE_TEXT.to_string());
        }

        if arg == "--pipelined" {
            parsed.pipelined = true;
            continue;
        }

        if arg == "--no-annotations" {
            parsed.no_annotations = true;
            continue;
        }

        if arg == "--tick-ms" {
            let value = args
                .next()
                .ok_or_else(|| "missing value for --tick-ms".to_string())?;
            let millis = value
                .to_string_lossy()
                .parse::<u64>()
                .map_err(|_| format!("invalid tick period: {}", value.to_string_lossy()))?;
            parsed.tick_ms = Some(millis);
            continue;
        }

        if arg == "--config" {
            let value = args
                .next()
                .ok_or_else(|| "missing value for --config".to_string())?;
            parsed.config = Some(PathBuf::from(value));
            continue;
        }

        if arg.to_string_lossy().starts_with('-') {
            return Err(format!("unknown option: {}", arg.to_string_lossy()));
        }

        if program.is_some() {
            return Err("multiple program paths provided".to_string());
        }
        program = Some(PathBuf::from(arg));
    }

    parsed.program = program.ok_or_else(|| "missing program path".to_string())?;
    Ok(parsed)
}

fn resolve_config(args: &RunArgs) -> Result<SimConfig, String> {
    let mut config = match &args.config {
        Some(path) => load_config(path).map_err(|e| e.to_string())?,
        None => SimConfig {
            tick_millis: 0,
            ..SimConfig::default()
        },
    };
    if let Some(tick_ms) = args.tick_ms {
        config.tick_millis = tick_ms;
    }
    if args.pipelined {
        config.pipelined = true;
    }
    if args.no_annotations {
        config.annotations_enabled = false;
    }
    Ok(config)
}

fn run_program(args: &RunArgs) -> Result<(), i32> {
    let config = resolve_config(args).map_err(|e| {
        eprintln!("error: {e}");
        1
    })?;
    let program = load_program(&args.program).map_err(|e| {
        eprintln!("error: {e}");
        1
    })?;

    let cpu = Arc::new(Cpu::new(Arc::new(StdIo::spawn()), config));
    let reporter = Arc::new(ProblemReporter::new());
    cpu.register_listener(reporter.clone());
    cpu.register_listener(Arc::new(TracingListener));

    Sandbox::new()
        .and_then(|sandbox| cpu.attach_sandbox(sandbox))
        .map_err(|e| {
            eprintln!("error: {e}");
            1
        })?;
    cpu.load_program(Arc::new(program)).map_err(|e| {
        eprintln!("error: {e}");
        1
    })?;

    let handle = cpu.start().map_err(|e| {
        eprintln!("error: {e}");
        1
    })?;
    if handle.join().is_err() {
        eprintln!("error: simulation thread panicked");
        return Err(1);
    }
    info!(exit_code = ?cpu.exit_code(), "run finished");

    if reporter.problem_seen() {
        Err(1)
    } else {
        Ok(())
    }
}

fn run_repl() -> Result<(), i32> {
    let sandbox = Sandbox::new().map_err(|e| {
        eprintln!("error: {e}");
        1
    })?;
    match sandbox.run_repl(Arc::new(StdIo::spawn())) {
        ReplExit::Exited | ReplExit::InputClosed => Ok(()),
        ReplExit::Failed(_) => Err(1),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_tracing();

    let exit_code = match parse_args(env::args_os().skip(1)) {
        Ok(ParseResult::Help) => {
            println!("{USAGE_TEXT}");
            0
        }
        Ok(ParseResult::Command(Command::Run(args))) => match run_program(&args) {
            Ok(()) => 0,
            Err(code) => code,
        },
        Ok(ParseResult::Command(Command::Repl)) => match run_repl() {
            Ok(()) => 0,
            Err(code) => code,
        },
        Err(error) => {
            if error.starts_with("Usage:") {
                println!("{error}");
            } else {
                eprintln!("error: {error}");
                eprintln!("{USAGE_TEXT}");
            }
            1
        }
    };

    std::process::exit(exit_code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use std::path::PathBuf;

    fn args(values: &[&str]) -> impl Iterator<Item = OsString> {
        values
            .iter()
            .map(OsString::from)
            .collect::<Vec<_>>()
            .into_iter()
    }

    #[test]
    fn parses_run_command_with_flags() {
        let result = parse_run_args(args(&[
            "program.json",
            "--tick-ms",
            "25",
            "--pipelined",
            "--no-annotations",
            "--config",
            "sim.json",
        ]))
        .expect("valid run args should parse");

        assert_eq!(
            result,
            RunArgs {
                program: PathBuf::from("program.json"),
                tick_ms: Some(25),
                pipelined: true,
                no_annotations: true,
                config: Some(PathBuf::from("sim.json")),
            }
        );
    }

    #[test]
    fn parses_repl_and_help() {
        assert!(matches!(
            parse_args(args(&["repl"])),
            Ok(ParseResult::Command(Command::Repl))
        ));
        assert!(matches!(parse_args(args(&["-h"])), Ok(ParseResult::Help)));
    }

    #[test]
    fn rejects_unknown_command() {
        let error = parse_args(args(&["assemble"])).expect_err("unknown command should fail parse");
        assert!(error.contains("unknown command"));
    }

    #[test]
    fn rejects_bad_tick_period() {
        let error = parse_run_args(args(&["p.json", "--tick-ms", "fast"]))
            .expect_err("non-numeric tick should fail");
        assert!(error.contains("invalid tick period"));
    }

    #[test]
    fn run_requires_exactly_one_program() {
        let missing = parse_run_args(std::iter::empty()).expect_err("missing program");
        assert!(missing.contains("missing program"));
        let extra = parse_run_args(args(&["a.json", "b.json"])).expect_err("two programs");
        assert!(extra.contains("multiple program paths"));
    }

    #[test]
    fn flags_override_defaults_without_config_file() {
        let config = resolve_config(&RunArgs {
            program: PathBuf::from("p.json"),
            tick_ms: None,
            pipelined: true,
            no_annotations: true,
            config: None,
        })
        .expect("no file to read");
        assert_eq!(config.tick_millis, 0);
        assert!(config.pipelined);
        assert!(!config.annotations_enabled);
    }
}
