use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mainydb_core::{Engine, EngineOptions, FindOptions, Value};

#[derive(Parser)]
#[command(name = "mainydb")]
#[command(about = "MainyDB CLI - command-line interface for the MainyDB embedded document database")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import data from a JSON file into a database file
    Import {
        /// JSON file to import: `{ "collection": [documents...], ... }`
        file: PathBuf,
        /// Database file path
        #[arg(long, default_value = "mainydb.mdb")]
        db: PathBuf,
    },
    /// Export a database file to a JSON file
    Export {
        /// Output JSON file
        file: PathBuf,
        /// Database file path
        #[arg(long, default_value = "mainydb.mdb")]
        db: PathBuf,
        /// Export only one collection
        #[arg(long)]
        collection: Option<String>,
    },
    /// Print per-collection document and index counts
    Stats {
        /// Database file path
        #[arg(long, default_value = "mainydb.mdb")]
        db: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Import { file, db } => import_data(&file, &db),
        Commands::Export { file, db, collection } => export_data(&file, &db, collection.as_deref()),
        Commands::Stats { db } => print_stats(&db),
    }
}

fn json_to_value(j: serde_json::Value) -> Value {
    match j {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(items) => Value::Array(items.into_iter().map(json_to_value).collect()),
        serde_json::Value::Object(map) => Value::Document(map.into_iter().map(|(k, v)| (k, json_to_value(v))).collect()),
    }
}

fn value_to_json(v: &Value) -> serde_json::Value {
    match v {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::Number((*i).into()),
        Value::Float(f) => serde_json::Number::from_f64(*f).map(serde_json::Value::Number).unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Timestamp(ms) => serde_json::Value::Number((*ms).into()),
        Value::ObjectId(s) => serde_json::Value::String(s.clone()),
        Value::Binary(bytes) => serde_json::Value::String(hex_encode(bytes)),
        Value::Array(items) => serde_json::Value::Array(items.iter().map(value_to_json).collect()),
        Value::Document(fields) => serde_json::Value::Object(fields.iter().map(|(k, v)| (k.clone(), value_to_json(v))).collect()),
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn open_engine(db_path: &Path) -> Result<Engine> {
    Engine::open(db_path, EngineOptions::default()).with_context(|| format!("failed to open database: {}", db_path.display()))
}

/// Import data from JSON. Format: `{ "collection_name": [documents...], ... }`.
fn import_data(file: &Path, db_path: &Path) -> Result<()> {
    let content = fs::read_to_string(file).with_context(|| format!("failed to read file: {}", file.display()))?;
    let data: HashMap<String, serde_json::Value> = serde_json::from_str(&content).with_context(|| format!("invalid JSON in file: {}", file.display()))?;

    let engine = open_engine(db_path)?;
    let db = engine.database_or_create("default");
    let mut total = 0usize;

    for (collection_name, documents) in data {
        let docs = documents.as_array().with_context(|| format!("collection '{}' must be an array", collection_name))?;
        let coll = db.collection_or_create(&collection_name);
        for doc in docs {
            let value = json_to_value(doc.clone());
            coll.insert_one(value).with_context(|| format!("failed to insert document into '{}'", collection_name))?;
            total += 1;
        }
        println!("imported {} documents into '{}'", docs.len(), collection_name);
    }

    engine.checkpoint().with_context(|| "failed to checkpoint after import")?;
    println!("total: {} documents imported to {}", total, db_path.display());
    Ok(())
}

fn export_data(file: &Path, db_path: &Path, collection_filter: Option<&str>) -> Result<()> {
    let engine = open_engine(db_path)?;
    let db = engine.database_or_create("default");

    let mut output = serde_json::Map::new();
    let mut total = 0usize;

    for name in db.collection_names() {
        if let Some(filter) = collection_filter {
            if name != filter {
                continue;
            }
        }
        let coll = db.collection(&name).context("collection disappeared mid-export")?;
        let docs = coll.find(&Value::Document(Vec::new()), &FindOptions::new())?;
        println!("exporting {} documents from '{}'", docs.len(), name);
        total += docs.len();
        output.insert(name, serde_json::Value::Array(docs.iter().map(value_to_json).collect()));
    }

    let json = serde_json::to_string_pretty(&output).context("failed to serialize to JSON")?;
    fs::write(file, json).with_context(|| format!("failed to write to file: {}", file.display()))?;
    println!("total: {} documents exported to {}", total, file.display());
    Ok(())
}

fn print_stats(db_path: &Path) -> Result<()> {
    let engine = open_engine(db_path)?;
    for db_name in engine.database_names() {
        let db = engine.database(&db_name).unwrap();
        println!("database '{}':", db_name);
        for coll_name in db.collection_names() {
            let coll = db.collection(&coll_name).unwrap();
            let stats = coll.stats();
            println!("  {}: {} docs, {} indexes", coll_name, stats.document_count, stats.index_count);
        }
    }
    Ok(())
}
