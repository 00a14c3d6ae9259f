//! mapstore CLI
//!
//! Command-line interface for poking a mapstore database file.

use clap::{Parser, Subcommand};
use mapstore::{Config, Engine};
use tracing_subscriber::{fmt, EnvFilter};

/// mapstore CLI
#[derive(Parser, Debug)]
#[command(name = "mapstore-cli")]
#[command(about = "CLI for the mapstore embedded storage engine")]
#[command(version)]
struct Args {
    /// Database file
    #[arg(short, long, default_value = "./mapstore.db")]
    file: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a record under a key
    Put {
        /// Integer key to index the record under
        key: u64,

        /// The record payload
        value: String,
    },

    /// Look up a record by key
    Get {
        /// The key to look up
        key: u64,
    },

    /// Read a record by heap offset
    Read {
        /// The offset returned from a put
        offset: u64,
    },

    /// Tombstone a record by heap offset
    Del {
        /// The offset to delete
        offset: u64,
    },

    /// Scan keys in [start, end] inclusive
    Range {
        /// First key of the range
        start: u64,

        /// Last key of the range
        end: u64,
    },
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,mapstore=info"));

    fmt().with_env_filter(filter).with_target(false).init();

    let args = Args::parse();

    let config = Config::builder().path(&args.file).build();
    let engine = match Engine::open(config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("cannot open {}: {}", args.file, e);
            std::process::exit(1);
        }
    };

    let result = run(&engine, args.command);

    if let Err(e) = engine.close() {
        eprintln!("close failed: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = result {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(engine: &Engine, command: Commands) -> mapstore::Result<()> {
    match command {
        Commands::Put { key, value } => {
            let offset = engine.put(key, value.as_bytes())?;
            println!("{}", offset);
        }

        Commands::Get { key } => match engine.read_by_key(key)? {
            Some(bytes) => println!("{}", String::from_utf8_lossy(&bytes)),
            None => println!("(key absent)"),
        },

        Commands::Read { offset } => {
            let bytes = engine.read(offset)?;
            println!("{}", String::from_utf8_lossy(&bytes));
        }

        Commands::Del { offset } => {
            if engine.delete(offset) {
                println!("deleted");
            } else {
                println!("(not deleted: invalid or already tombstoned)");
            }
        }

        Commands::Range { start, end } => {
            for (key, offset) in engine.range_query(start, end)? {
                println!("{}\t{}", key, offset);
            }
        }
    }

    Ok(())
}
