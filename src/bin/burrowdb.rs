//! # BurrowDB CLI
//!
//! Interactive driver for a BurrowDB store.
//!
//! ## Usage
//!
//! ```bash
//! # Open existing store (created with 64MB capacity if absent)
//! burrowdb ./my.db
//!
//! # Create a new store with an explicit capacity
//! burrowdb --create --size 16777216 ./my.db
//! ```
//!
//! Inside the REPL:
//!
//! ```text
//! burrow> set name marmot
//! ok
//! burrow> get name
//! marmot
//! burrow> del name
//! deleted
//! burrow> print
//! ...
//! ```
//!
//! Log verbosity follows `BURROW_LOG` (e.g. `BURROW_LOG=burrowdb=debug`).

use std::env;
use std::io::Write;
use std::path::PathBuf;

use burrowdb::Database;
use eyre::{bail, Result, WrapErr};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing_subscriber::EnvFilter;

const DEFAULT_SIZE: u64 = 64 * 1024 * 1024;
const PROMPT: &str = "burrow> ";

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    init_logging();

    let args: Vec<String> = env::args().collect();

    let mut create_mode = false;
    let mut size = DEFAULT_SIZE;
    let mut db_path: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            "--version" | "-v" => {
                println!("burrowdb {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--create" | "-c" => {
                create_mode = true;
            }
            "--size" | "-s" => {
                i += 1;
                let value = args.get(i).map(String::as_str);
                size = match value {
                    Some(v) => v
                        .parse()
                        .wrap_err_with(|| format!("invalid --size value '{}'", v))?,
                    None => bail!("--size needs a byte count"),
                };
            }
            arg if arg.starts_with('-') => {
                bail!("unknown option: {}", arg);
            }
            path => {
                if db_path.is_some() {
                    bail!("multiple store paths specified");
                }
                db_path = Some(PathBuf::from(path));
            }
        }
        i += 1;
    }

    let Some(db_path) = db_path else {
        print_usage();
        return Ok(());
    };

    let db = if create_mode || !db_path.exists() {
        Database::create(&db_path, size)
            .wrap_err_with(|| format!("failed to create store at {:?}", db_path))?
    } else {
        Database::open(&db_path)
            .wrap_err_with(|| format!("failed to open store at {:?}", db_path))?
    };

    repl(db)
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("BURROW_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}

fn repl(mut db: Database) -> Result<()> {
    println!("BurrowDB {} - type 'help' for commands", env!("CARGO_PKG_VERSION"));

    let mut editor = DefaultEditor::new().wrap_err("failed to initialize line editor")?;

    loop {
        match editor.readline(PROMPT) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line);
                match dispatch(&mut db, line) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => eprintln!("error: {:#}", e),
                }
            }
            Err(ReadlineError::Interrupted) => println!("^C"),
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("error reading input: {}", err);
                break;
            }
        }
    }

    db.close()?;
    println!("Bye");
    Ok(())
}

/// Executes one command line. Returns false when the REPL should exit.
fn dispatch(db: &mut Database, line: &str) -> Result<bool> {
    let mut parts = line.splitn(3, char::is_whitespace);
    let command = parts.next().unwrap_or_default();

    match command {
        "set" => {
            let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
                bail!("usage: set <key> <value>");
            };
            db.insert(key.as_bytes(), value.as_bytes())?;
            println!("ok");
        }
        "get" => {
            let Some(key) = parts.next() else {
                bail!("usage: get <key>");
            };
            match db.search(key.as_bytes())? {
                Some(value) => {
                    let mut stdout = std::io::stdout().lock();
                    stdout.write_all(&value)?;
                    stdout.write_all(b"\n")?;
                }
                None => println!("(not found)"),
            }
        }
        "del" => {
            let Some(key) = parts.next() else {
                bail!("usage: del <key>");
            };
            if db.delete(key.as_bytes())? {
                println!("deleted");
            } else {
                println!("(not found)");
            }
        }
        "print" => {
            let mut stdout = std::io::stdout().lock();
            db.dump(&mut stdout)?;
        }
        "stats" => {
            let stats = db.stats();
            println!("pages:     {}", stats.page_count);
            println!("reserved:  {}", stats.reserved_pages);
            println!("allocated: {}", stats.allocated_pages);
            println!("root page: {}", stats.root_page);
        }
        "help" => {
            println!("commands:");
            println!("  set <key> <value>   insert or replace an entry");
            println!("  get <key>           look an entry up");
            println!("  del <key>           remove an entry");
            println!("  print               dump the whole tree");
            println!("  stats               page accounting");
            println!("  quit                exit");
        }
        "quit" | "exit" => return Ok(false),
        other => bail!("unknown command '{}' (try 'help')", other),
    }

    Ok(true)
}

fn print_usage() {
    println!("BurrowDB - embedded ordered key-value store");
    println!();
    println!("USAGE:");
    println!("    burrowdb [OPTIONS] <STORE_PATH>");
    println!();
    println!("ARGS:");
    println!("    <STORE_PATH>       Path to the store file");
    println!();
    println!("OPTIONS:");
    println!("    -c, --create       Create a new store (default if path doesn't exist)");
    println!("    -s, --size <N>     Capacity in bytes for a new store (default 64MB)");
    println!("    -h, --help         Print help information");
    println!("    -v, --version      Print version information");
}
