//!
//! rolegate CLI binary
//! -------------------
//! Administrative tool over a file-backed role assignment store: grant, revoke
//! and list role assignments, and ask the evaluator access questions. Every
//! command prints one JSON document on stdout. `--repl` starts an interactive
//! interpreter accepting the same commands.

use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::{json, Value as JsonValue};
use tracing_subscriber::{fmt, EnvFilter};

use rolegate::evaluator::{self, Capability, Query};
use rolegate::{Gate, GateConfig, Role};

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} [flags] <command> [args...]\n  {program} [flags] --repl\n\nFlags:\n  --config <file>          JSON config file (data_dir, catalog_path, audit_log, log_filter)\n  --root <dir>             Data directory for the assignment store (env ROLEGATE_DATA_DIR)\n  --catalog <file>         JSON permission catalog replacing the built-in table (env ROLEGATE_CATALOG)\n  --audit-log <file>       Append audit events as JSON lines (env ROLEGATE_AUDIT_LOG)\n  --repl                   Start interactive mode\n  -h, --help               Show this help\n\nCommands:\n  roles                                   list roles with their classification\n  assign <actor> <role> [--by <actor>]    grant a role (upsert)\n  revoke <actor> [--by <actor>]           reset an actor to the default role\n  whois <actor>                           show the stored assignment\n  list                                    dump every assignment\n  check <role|-> <path>                   may the role reach the route? ('-' = unauthenticated)\n  can <role|-> <view|edit|create|delete> <resource>\n  permit <role|-> <action>                does the role hold the action token?\n  session <actor> <path>...               hydrate a session for the actor and guard each path\n\nGranter defaults to the current OS user for assign/revoke."
    );
}

fn role_tag(word: &str) -> Option<&str> { if word == "-" { None } else { Some(word) } }

fn arg<'a>(words: &'a [String], i: usize, what: &str) -> Result<&'a str> {
    words.get(i).map(|s| s.as_str()).ok_or_else(|| anyhow!("missing <{}>", what))
}

fn split_by_flag(words: &[String]) -> Result<(Vec<String>, Option<String>)> {
    let mut rest = Vec::new();
    let mut by = None;
    let mut i = 0;
    while i < words.len() {
        if words[i] == "--by" {
            by = Some(words.get(i + 1).cloned().ok_or_else(|| anyhow!("--by requires a value"))?);
            i += 2;
            continue;
        }
        rest.push(words[i].clone());
        i += 1;
    }
    Ok((rest, by))
}

fn run_command(gate: &Gate, words: &[String]) -> Result<JsonValue> {
    let Some(cmd) = words.first() else { bail!("no command given") };
    let cat = gate.catalog.as_ref();
    match cmd.as_str() {
        "roles" => Ok(JsonValue::Array(
            Role::ALL
                .iter()
                .map(|r| json!({ "role": r.as_str(), "admin": r.is_admin(), "business": r.is_business(), "driver": r.is_driver() }))
                .collect(),
        )),
        "assign" => {
            let (rest, by) = split_by_flag(&words[1..])?;
            let actor = arg(&rest, 0, "actor")?;
            let role: Role = arg(&rest, 1, "role")?.parse()?;
            let by = by.unwrap_or_else(whoami::username);
            Ok(serde_json::to_value(gate.assignments.assign(actor, role, Some(&by))?)?)
        }
        "revoke" => {
            let (rest, by) = split_by_flag(&words[1..])?;
            let actor = arg(&rest, 0, "actor")?;
            let by = by.unwrap_or_else(whoami::username);
            Ok(serde_json::to_value(gate.assignments.revoke(actor, Some(&by))?)?)
        }
        "whois" => {
            let actor = arg(words, 1, "actor")?;
            Ok(serde_json::to_value(gate.assignments.assignment_for(actor)?)?)
        }
        "list" => Ok(serde_json::to_value(gate.assignments.list_all()?)?),
        "check" => {
            let tag = role_tag(arg(words, 1, "role")?);
            let path = arg(words, 2, "path")?;
            Ok(serde_json::to_value(evaluator::evaluate_tag(cat, tag, Query::Route(path)))?)
        }
        "can" => {
            let tag = role_tag(arg(words, 1, "role")?);
            let cap: Capability = arg(words, 2, "capability")?.parse()?;
            let resource = arg(words, 3, "resource")?;
            Ok(serde_json::to_value(evaluator::evaluate_tag(cat, tag, Query::Resource(cap, resource)))?)
        }
        "permit" => {
            let tag = role_tag(arg(words, 1, "role")?);
            let action = arg(words, 2, "action")?;
            Ok(serde_json::to_value(evaluator::evaluate_tag(cat, tag, Query::Action(action)))?)
        }
        "session" => {
            let actor = arg(words, 1, "actor")?;
            if words.len() < 3 { bail!("missing <path>"); }
            let role = gate.access.hydrate(&gate.assignments, actor)?;
            let checks: Vec<JsonValue> = words[2..]
                .iter()
                .map(|p| {
                    let d = gate.access.decide_route(p, None);
                    json!({ "path": p, "allow": d.allow, "reason": d.reason })
                })
                .collect();
            gate.access.clear_role();
            Ok(json!({ "actor": actor, "role": role, "checks": checks }))
        }
        other => bail!("unknown command '{}'", other),
    }
}

fn print_json(v: &JsonValue) {
    match serde_json::to_string_pretty(v) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("failed to render output: {}", e),
    }
}

fn repl(gate: &Gate) -> Result<()> {
    use rustyline::error::ReadlineError;
    let mut rl = rustyline::DefaultEditor::new().context("failed to start line editor")?;
    eprintln!("rolegate interactive mode. Type 'help' for commands, 'quit' to exit.");
    loop {
        match rl.readline("rolegate> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() { continue; }
                let _ = rl.add_history_entry(line);
                match line {
                    "quit" | "exit" => break,
                    "help" => { print_usage("rolegate_cli"); continue; }
                    _ => {}
                }
                let words: Vec<String> = line.split_whitespace().map(|s| s.to_string()).collect();
                match run_command(gate, &words) {
                    Ok(v) => print_json(&v),
                    Err(e) => eprintln!("error: {}", e),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(anyhow!(e)),
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let mut args: Vec<String> = env::args().collect();
    let program = args.remove(0);

    let mut config_path: Option<PathBuf> = None;
    let mut root: Option<PathBuf> = None;
    let mut catalog: Option<PathBuf> = None;
    let mut audit_log: Option<PathBuf> = None;
    let mut interactive = false;
    let mut command: Vec<String> = Vec::new();

    let mut i = 0;
    while i < args.len() {
        // Flags are only recognized before the command word.
        if !command.is_empty() { command.push(args[i].clone()); i += 1; continue; }
        match args[i].as_str() {
            flag @ ("--config" | "--root" | "--catalog" | "--audit-log") => {
                if i + 1 >= args.len() { eprintln!("{} requires a value", flag); print_usage(&program); std::process::exit(2); }
                let v = PathBuf::from(&args[i + 1]);
                match flag {
                    "--config" => config_path = Some(v),
                    "--root" => root = Some(v),
                    "--catalog" => catalog = Some(v),
                    _ => audit_log = Some(v),
                }
                i += 2;
            }
            "--repl" => { interactive = true; i += 1; }
            "-h" | "--help" => { print_usage(&program); return Ok(()); }
            word => { command.push(word.to_string()); i += 1; }
        }
    }

    let mut cfg = match &config_path {
        Some(p) => GateConfig::load(p)?,
        None => GateConfig::default(),
    }
    .with_env_overrides();
    if let Some(v) = root { cfg.data_dir = v; }
    if let Some(v) = catalog { cfg.catalog_path = Some(v); }
    if let Some(v) = audit_log { cfg.audit_log = Some(v); }

    // Init logging on stderr so stdout stays machine-readable
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let gate = Gate::open(&cfg).with_context(|| format!("failed to open rolegate at {}", cfg.data_dir.display()))?;

    if interactive { return repl(&gate); }
    if command.is_empty() { print_usage(&program); std::process::exit(2); }
    let out = run_command(&gate, &command)?;
    print_json(&out);
    Ok(())
}
