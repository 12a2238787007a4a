//! `mcpsync memory …`

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use clap::Subcommand;
use mcpsync_memory::{MemoryExport, MemoryStore};
use mcpsync_settings::{SyncSettings, resolve_memory_db_path};
use serde_json::{Map, Value};

/// Memory store operations.
#[derive(Subcommand, Debug)]
pub enum MemoryCommand {
    /// Print store statistics.
    Stats,
    /// Print one record (counts as a read).
    Get {
        /// Record id.
        id: String,
    },
    /// Store content; prints its id.
    Store {
        /// Text to remember.
        content: String,
        /// Metadata entry, `key=value` (value parsed as JSON when possible).
        #[arg(long = "meta", value_parser = parse_meta)]
        meta: Vec<(String, Value)>,
        /// Embedding as a JSON array of numbers.
        #[arg(long)]
        embedding: Option<String>,
    },
    /// Search by metadata, or by similarity when `--embedding` is given.
    Search {
        /// Required metadata entry, `key=value`.
        #[arg(long = "meta", value_parser = parse_meta)]
        meta: Vec<(String, Value)>,
        /// Query embedding as a JSON array of numbers.
        #[arg(long)]
        embedding: Option<String>,
        /// Maximum similarity hits.
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Minimum cosine similarity.
        #[arg(long, default_value_t = 0.0)]
        threshold: f32,
    },
    /// Delete one record.
    Delete {
        /// Record id.
        id: String,
    },
    /// Write every record as JSON.
    Export {
        /// Output file (stdout when absent).
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Upsert records from an export file.
    Import {
        /// Export file.
        file: PathBuf,
    },
}

/// Open the configured store and run `command`, printing to stdout.
pub fn run(settings: &SyncSettings, command: MemoryCommand) -> Result<()> {
    let path = resolve_memory_db_path(settings);
    let store = MemoryStore::from_settings(&settings.memory, &path)
        .with_context(|| format!("failed to open memory store at {}", path.display()))?;
    let stdout = std::io::stdout();
    execute(&store, command, &mut stdout.lock())
}

fn execute(store: &MemoryStore, command: MemoryCommand, out: &mut impl Write) -> Result<()> {
    match command {
        MemoryCommand::Stats => print_json(out, &store.statistics()?),
        MemoryCommand::Get { id } => match store.retrieve(&id)? {
            Some(record) => print_json(out, &record),
            None => bail!("no memory with id {id}"),
        },
        MemoryCommand::Store {
            content,
            meta,
            embedding,
        } => {
            let embedding = embedding.as_deref().map(parse_embedding).transpose()?;
            let id = store.store(&content, meta.into_iter().collect(), embedding)?;
            writeln!(out, "{id}")?;
            Ok(())
        }
        MemoryCommand::Search {
            meta,
            embedding,
            limit,
            threshold,
        } => {
            if let Some(raw) = embedding {
                let query = parse_embedding(&raw)?;
                let hits: Vec<Value> = store
                    .search_similar(&query, limit, threshold)?
                    .into_iter()
                    .map(|(record, score)| serde_json::json!({ "score": score, "record": record }))
                    .collect();
                print_json(out, &hits)
            } else {
                let filters: Map<String, Value> = meta.into_iter().collect();
                print_json(out, &store.search_by_metadata(&filters)?)
            }
        }
        MemoryCommand::Delete { id } => {
            if !store.delete(&id)? {
                bail!("no memory with id {id}");
            }
            writeln!(out, "deleted {id}")?;
            Ok(())
        }
        MemoryCommand::Export { out: None } => print_json(out, &store.export()?),
        MemoryCommand::Export { out: Some(path) } => {
            let export = store.export()?;
            let body = serde_json::to_string_pretty(&export)?;
            std::fs::write(&path, body)
                .with_context(|| format!("failed to write {}", path.display()))?;
            writeln!(out, "exported {} records to {}", export.records.len(), path.display())?;
            Ok(())
        }
        MemoryCommand::Import { file } => {
            let body = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let export: MemoryExport =
                serde_json::from_str(&body).context("not a memory export document")?;
            let imported = store.import(&export)?;
            writeln!(out, "imported {imported} records")?;
            Ok(())
        }
    }
}

fn print_json(out: &mut impl Write, value: &impl serde::Serialize) -> Result<()> {
    writeln!(out, "{}", serde_json::to_string_pretty(value)?)?;
    Ok(())
}

/// Parse `key=value`; the value is JSON when it parses, a string otherwise.
fn parse_meta(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))?;
    if key.is_empty() {
        return Err("metadata key must not be empty".into());
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_owned()));
    Ok((key.to_owned(), value))
}

fn parse_embedding(raw: &str) -> Result<Vec<f32>> {
    serde_json::from_str(raw).map_err(|e| anyhow!("embedding must be a JSON array of numbers: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn output(store: &MemoryStore, command: MemoryCommand) -> String {
        let mut buf = Vec::new();
        execute(store, command, &mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    fn store_cmd(content: &str, meta: &[&str]) -> MemoryCommand {
        MemoryCommand::Store {
            content: content.into(),
            meta: meta.iter().map(|m| parse_meta(m).unwrap()).collect(),
            embedding: None,
        }
    }

    #[test]
    fn meta_values_parse_as_json_or_string() {
        assert_eq!(parse_meta("n=3").unwrap(), ("n".into(), json!(3)));
        assert_eq!(parse_meta("flag=true").unwrap(), ("flag".into(), json!(true)));
        assert_eq!(parse_meta("topic=rust").unwrap(), ("topic".into(), json!("rust")));
        assert_eq!(parse_meta("eq=a=b").unwrap(), ("eq".into(), json!("a=b")));
        assert!(parse_meta("novalue").is_err());
        assert!(parse_meta("=x").is_err());
    }

    #[test]
    fn store_get_delete() {
        let store = MemoryStore::in_memory(100).unwrap();
        let id = output(&store, store_cmd("borrow checker notes", &["topic=rust"]));
        let id = id.trim().to_owned();

        let record: Value = serde_json::from_str(&output(&store, MemoryCommand::Get { id: id.clone() })).unwrap();
        assert_eq!(record["content"], "borrow checker notes");
        assert_eq!(record["metadata"]["topic"], "rust");
        assert_eq!(record["accessCount"], 1);

        assert!(output(&store, MemoryCommand::Delete { id: id.clone() }).contains("deleted"));
        let mut sink = Vec::new();
        assert!(execute(&store, MemoryCommand::Delete { id: id.clone() }, &mut sink).is_err());
        assert!(execute(&store, MemoryCommand::Get { id }, &mut sink).is_err());
    }

    #[test]
    fn search_by_metadata_and_similarity() {
        let store = MemoryStore::in_memory(100).unwrap();
        let _ = output(&store, store_cmd("a", &["topic=rust"]));
        let _ = output(&store, store_cmd("b", &["topic=go"]));
        let _ = output(
            &store,
            MemoryCommand::Store {
                content: "c".into(),
                meta: Vec::new(),
                embedding: Some("[1.0, 0.0]".into()),
            },
        );

        let hits: Value = serde_json::from_str(&output(
            &store,
            MemoryCommand::Search {
                meta: vec![parse_meta("topic=rust").unwrap()],
                embedding: None,
                limit: 10,
                threshold: 0.0,
            },
        ))
        .unwrap();
        assert_eq!(hits.as_array().unwrap().len(), 1);
        assert_eq!(hits[0]["content"], "a");

        let similar: Value = serde_json::from_str(&output(
            &store,
            MemoryCommand::Search {
                meta: Vec::new(),
                embedding: Some("[0.9, 0.1]".into()),
                limit: 5,
                threshold: 0.5,
            },
        ))
        .unwrap();
        assert_eq!(similar.as_array().unwrap().len(), 1);
        assert_eq!(similar[0]["record"]["content"], "c");
    }

    #[test]
    fn bad_embedding_is_an_error() {
        let store = MemoryStore::in_memory(100).unwrap();
        let mut sink = Vec::new();
        let cmd = MemoryCommand::Store {
            content: "x".into(),
            meta: Vec::new(),
            embedding: Some("not-an-array".into()),
        };
        assert!(execute(&store, cmd, &mut sink).is_err());
    }

    #[test]
    fn export_then_import_into_fresh_store() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("export.json");
        let source = MemoryStore::in_memory(100).unwrap();
        let _ = output(&source, store_cmd("kept", &[]));
        let _ = output(&source, store_cmd("also kept", &[]));
        assert!(
            output(&source, MemoryCommand::Export { out: Some(file.clone()) })
                .contains("exported 2 records")
        );

        let target = MemoryStore::in_memory(100).unwrap();
        assert!(output(&target, MemoryCommand::Import { file }).contains("imported 2 records"));
        let stats: Value = serde_json::from_str(&output(&target, MemoryCommand::Stats)).unwrap();
        assert_eq!(stats["totalRecords"], 2);
    }

    #[test]
    fn run_uses_configured_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = SyncSettings::default();
        settings.memory.db_path = dir.path().join("mem.db").to_string_lossy().into_owned();
        run(&settings, MemoryCommand::Stats).unwrap();
        assert!(dir.path().join("mem.db").exists());
    }
}
