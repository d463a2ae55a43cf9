//! tailor CLI — driving adapter for the tailor rule store.
//!
//! Loads a rule document into the reference domain (`tailor-test`) and
//! resolves payloads against a query given on the command line.
//!
//! Subcommands:
//! - `eval <doc> <name> [--query key=value...] [--all] [--explain]` — resolve one payload
//! - `eval-each <doc> [--query key=value...]` — resolve every declared payload
//! - `rules <doc> <name>` — print the normalized rule list
//! - `check <doc>` — validate the document loads without errors
//! - `info` — print declared payloads and dimensions
//!
//! Set `RUST_LOG=tailor=debug` to see store activity on stderr.

use std::process;

use serde_json::Value;
use tailor::{Query, RuleDocument, Store, StoreError};
use tracing::debug;
use tracing_subscriber::EnvFilter;

fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: failed to start runtime: {e}");
            process::exit(1);
        }
    };

    let result = match args[1].as_str() {
        "eval" => runtime.block_on(cmd_eval(&args[2..])),
        "eval-each" => runtime.block_on(cmd_eval_each(&args[2..])),
        "rules" => runtime.block_on(cmd_rules(&args[2..])),
        "check" => runtime.block_on(cmd_check(&args[2..])),
        "info" => cmd_info(),
        "--help" | "-h" | "help" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("error: unknown command \"{other}\"");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Commands
// ═══════════════════════════════════════════════════════════════════════════════

async fn cmd_eval(args: &[String]) -> Result<(), String> {
    let [doc_path, name, rest @ ..] = args else {
        return Err("eval requires a document path and a payload name".into());
    };
    let options = parse_options(rest)?;
    let store = load_store(doc_path).await?;

    if options.explain {
        let trace = store
            .explain(name, &options.query)
            .await
            .map_err(describe)?;
        print!("{trace}");
        return Ok(());
    }

    if options.all {
        let payloads = store
            .get_payloads(name, &options.query)
            .await
            .map_err(describe)?;
        if payloads.is_empty() {
            println!("(no match)");
        }
        for payload in payloads {
            println!("{}", render(&payload));
        }
        return Ok(());
    }

    match store
        .get_payload(name, &options.query)
        .await
        .map_err(describe)?
    {
        Some(payload) => println!("{}", render(&payload)),
        None => println!("(no match)"),
    }
    Ok(())
}

async fn cmd_eval_each(args: &[String]) -> Result<(), String> {
    let [doc_path, rest @ ..] = args else {
        return Err("eval-each requires a document path".into());
    };
    let options = parse_options(rest)?;
    let store = load_store(doc_path).await?;

    let payloads = store
        .get_payload_for_each_name(&options.query)
        .await
        .map_err(describe)?;
    for (name, payload) in payloads {
        match payload {
            Some(payload) => println!("{name}: {}", render(&payload)),
            None => println!("{name}: (no match)"),
        }
    }
    Ok(())
}

async fn cmd_rules(args: &[String]) -> Result<(), String> {
    let [doc_path, name] = args else {
        return Err("rules requires a document path and a payload name".into());
    };
    let store = load_store(doc_path).await?;
    store.payload_validator(name).map_err(describe)?;
    let rules = store.rules(name).unwrap_or(&[]);

    let json = serde_json::to_string_pretty(rules).map_err(|e| e.to_string())?;
    println!("{json}");
    Ok(())
}

async fn cmd_check(args: &[String]) -> Result<(), String> {
    let [doc_path] = args else {
        return Err("check requires a document path".into());
    };
    let store = load_store(doc_path).await?;

    let rules: usize = store
        .payload_names()
        .into_iter()
        .filter_map(|name| store.rules(name))
        .map(<[_]>::len)
        .sum();
    println!("Document valid ({rules} normalized rules)");
    Ok(())
}

fn cmd_info() -> Result<(), String> {
    let store = build_store().map_err(describe)?;

    println!("Declared payloads:");
    for name in store.payload_names() {
        println!("  {name}");
    }

    println!("\nTargeting dimensions:");
    for name in store.dimension_names() {
        println!("  {name}");
    }

    println!("\nFall-through dimensions:");
    for name in store.fall_through_dimension_names() {
        println!("  {name}");
    }

    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Store assembly (composition root)
// ═══════════════════════════════════════════════════════════════════════════════

fn build_store() -> Result<Store, StoreError> {
    tailor_test::register(Store::builder()).build()
}

async fn load_store(path: &str) -> Result<Store, String> {
    let document = RuleDocument::from_path(path).map_err(describe)?;
    debug!(path, payloads = document.len(), "document parsed");
    build_store()
        .map_err(describe)?
        .insert_document(document)
        .await
        .map_err(describe)
}

/// Error text; validation errors list one issue per line.
fn describe(err: StoreError) -> String {
    match err.as_validation() {
        Some(validation) => {
            let mut text = format!("{} validation issue(s)", validation.issues().len());
            for issue in validation.issues() {
                text.push_str(&format!("\n  {issue}"));
            }
            text
        }
        None => err.to_string(),
    }
}

fn render(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Argument parsing
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct Options {
    query: Query,
    all: bool,
    explain: bool,
}

fn parse_options(args: &[String]) -> Result<Options, String> {
    let mut options = Options::default();
    let mut i = 0;

    while i < args.len() {
        match args[i].as_str() {
            "--query" => {
                i += 1;
                while i < args.len() && !args[i].starts_with("--") {
                    let (key, value) = parse_pair(&args[i])?;
                    options.query.insert(key, value);
                    i += 1;
                }
            }
            "--all" => {
                options.all = true;
                i += 1;
            }
            "--explain" => {
                options.explain = true;
                i += 1;
            }
            other => return Err(format!("unexpected argument \"{other}\"")),
        }
    }

    if options.all && options.explain {
        return Err("--all and --explain cannot be combined".into());
    }
    Ok(options)
}

/// `key=value`; the value is read as JSON, falling back to a plain string.
fn parse_pair(pair: &str) -> Result<(String, Value), String> {
    let (key, raw) = pair
        .split_once('=')
        .ok_or_else(|| format!("invalid query pair \"{pair}\", expected key=value"))?;
    if key.is_empty() {
        return Err(format!("invalid query pair \"{pair}\", empty key"));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()));
    Ok((key.to_owned(), value))
}

fn print_usage() {
    eprintln!(
        "Usage: tailor <command> [options]

Commands:
  eval <doc> <name> [--query key=value...] [--all | --explain]
                                         Resolve one payload
  eval-each <doc> [--query key=value...] Resolve every declared payload
  rules <doc> <name>                     Print the normalized rules of a payload
  check <doc>                            Validate a rule document
  info                                   Print declared payloads and dimensions
  help                                   Show this help

Query values parse as JSON when they can (true, 3, [\"a\"]), else as strings."
    );
}
