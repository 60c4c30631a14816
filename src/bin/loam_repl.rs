//! Interactive shell over a local engine.
//!
//! ```text
//! loam-repl [data_dir]
//! ```
//!
//! Commands: `put("k","v")`, `get("k")`, `delete("k")`, `ls`, `flush`,
//! `clear`, `quit`.

use std::io::{self, BufRead, Write};

use tracing_subscriber::EnvFilter;

use loamdb::{command, Config, Engine};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let data_dir = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "loamdb-data".to_string());

    let engine = match Engine::open(Config::new(&data_dir)) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("failed to open engine at {data_dir}: {e}");
            std::process::exit(1);
        }
    };

    println!("loamdb shell — data dir: {data_dir}");
    println!("commands: put(\"k\",\"v\")  get(\"k\")  delete(\"k\")  ls  flush  clear  quit");

    let stdin = io::stdin();
    loop {
        print!("> ");
        let _ = io::stdout().flush();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                eprintln!("read error: {e}");
                break;
            }
        }

        let line = line.trim();
        if line == "quit" || line == "exit" {
            break;
        }
        if line.is_empty() {
            continue;
        }

        match command::parse(line) {
            Ok(cmd) => println!("{}", command::execute(&engine, cmd)),
            Err(e) => println!("ERR {e}"),
        }
    }

    println!("bye");
}
