//! `arbiter` – behavior arbitration command line.
//!
//! ```text
//! arbiter replay <scenario.toml> [--json]   run a scripted scenario
//! arbiter validate <machine.json|toml>      check a state machine file
//! arbiter schema                            print the machine JSON schema
//! ```
//!
//! Replays are deterministic: the world clock advances by `tick_ms` per tick
//! and nothing reads wall time. `ARBITER_TICK_MS` and `ARBITER_MAX_TICKS`
//! override the scenario file.

mod replay;
mod scenario;
mod validate;

use std::path::Path;
use std::process::ExitCode;

use colored::{ColoredString, Colorize};
use tracing::error;

use arbiter_types::{DebugColor, StateMachineConfig};

use crate::replay::{Replay, ReplayTrace};

fn main() -> ExitCode {
    // ── Structured logging ────────────────────────────────────────────────
    // RUST_LOG controls verbosity; ARBITER_LOG_FORMAT=json switches to
    // newline-delimited JSON. User-facing output stays on stdout.
    let _guard = arbiter_runtime::init_tracing("arbiter");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let result = match args.first().map(String::as_str) {
        Some("replay") => cmd_replay(&args[1..]),
        Some("validate") => cmd_validate(&args[1..]),
        Some("schema") => cmd_schema(),
        Some("help" | "--help" | "-h") | None => {
            print_help();
            Ok(())
        }
        Some(other) => Err(format!("unknown command '{other}'")),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("{}: {}", "Error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_replay(args: &[String]) -> Result<(), String> {
    let mut path = None;
    let mut json = false;
    for arg in args {
        match arg.as_str() {
            "--json" => json = true,
            flag if flag.starts_with("--") => return Err(format!("unknown flag '{flag}'")),
            file => path = Some(file),
        }
    }
    let path = path.ok_or("usage: arbiter replay <scenario.toml> [--json]")?;

    let scenario = scenario::load_from(Path::new(path))?;
    let trace = Replay::new(scenario)
        .and_then(Replay::run)
        .map_err(|e| e.to_string())?;

    if json {
        let out = serde_json::to_string_pretty(&trace).map_err(|e| e.to_string())?;
        println!("{out}");
    } else {
        print_trace(&trace);
    }
    Ok(())
}

fn cmd_validate(args: &[String]) -> Result<(), String> {
    let [path] = args else {
        return Err("usage: arbiter validate <machine.json|machine.toml>".to_string());
    };
    let config = scenario::load_machine(Path::new(path))?;
    let report = validate::validate(config).map_err(|e| e.to_string())?;

    println!();
    println!("{} {}", "✓".green().bold(), path.bold());
    println!("  Initial state : {}", report.initial_state.yellow());
    for (state, conditions) in &report.states {
        let names: Vec<&str> = conditions.iter().map(|c| c.name.as_str()).collect();
        println!("    • {:<20} {}", state.bold(), names.join(", ").dimmed());
    }
    if !report.required_strategies.is_empty() {
        println!("  Strategies to register in code:");
        for name in &report.required_strategies {
            println!("    • {}", name.cyan());
        }
    }
    for warning in &report.warnings {
        println!("  {} {}", "warning:".yellow().bold(), warning);
    }
    println!();
    Ok(())
}

fn cmd_schema() -> Result<(), String> {
    let schema = schemars::schema_for!(StateMachineConfig);
    let out = serde_json::to_string_pretty(&schema).map_err(|e| e.to_string())?;
    println!("{out}");
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

fn print_trace(trace: &ReplayTrace) {
    println!();
    println!("{} {}", "Replay".bold().underline(), trace.machine.bold().cyan());
    for warning in &trace.warnings {
        println!("  {} {}", "warning:".yellow().bold(), warning);
    }
    println!();

    for tick in &trace.ticks {
        for t in &tick.transitions {
            println!(
                "  {:>4} {:>7}ms  {} {} → {}",
                tick.tick.to_string().dimmed(),
                tick.at_ms,
                format!("[{}]", t.reason).magenta(),
                t.from.as_deref().unwrap_or("∅"),
                t.to.bold(),
            );
        }
        let state = tick.state.as_deref().unwrap_or("-");
        println!(
            "  {:>4} {:>7}ms  {:<20} {}",
            tick.tick.to_string().dimmed(),
            tick.at_ms,
            paint(state, tick.color),
            tick.chain.join(" › ").dimmed(),
        );
    }

    println!();
    match trace.final_state() {
        Some(state) => println!("  Final state: {}", state.bold()),
        None => println!("  Machine {}", "ended".yellow()),
    }
    println!();
}

fn paint(text: &str, color: Option<DebugColor>) -> ColoredString {
    match color {
        Some(DebugColor::White) => text.white(),
        Some(DebugColor::Red) => text.red(),
        Some(DebugColor::Green) => text.green(),
        Some(DebugColor::Blue) => text.blue(),
        Some(DebugColor::Yellow) => text.yellow(),
        Some(DebugColor::Cyan) => text.cyan(),
        Some(DebugColor::Magenta) => text.magenta(),
        Some(DebugColor::Orange) => text.truecolor(255, 165, 0),
        Some(DebugColor::Black) | None => text.normal(),
    }
}

fn print_help() {
    println!();
    println!("{}", "arbiter – behavior arbitration tools".bold().underline());
    println!("  {}  – run a scenario and print the state trace", "replay <scenario.toml> [--json]".bold().cyan());
    println!("  {}  – check a state machine file", "validate <machine.json|toml>".bold().cyan());
    println!("  {}  – print the state machine JSON schema", "schema".bold().cyan());
    println!();
    println!("  Environment: {}, {}, {}, {}",
        "RUST_LOG".dimmed(),
        "ARBITER_LOG_FORMAT".dimmed(),
        "ARBITER_TICK_MS".dimmed(),
        "ARBITER_MAX_TICKS".dimmed(),
    );
    println!();
}
