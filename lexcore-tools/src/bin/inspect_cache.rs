//! Read-only dump of the two-tier cache's L2 table: key, encoding byte,
//! and payload size. Table name must stay in lockstep with
//! `lexcore::cache`'s private `L2_TABLE` definition.

use anyhow::{Context, Result};
use clap::Parser;
use redb::{Database, ReadableTable, TableDefinition};
use std::path::PathBuf;

const L2_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("cache_entries");

fn encoding_name(byte: u8) -> &'static str {
    match byte {
        0x00 => "raw",
        0x01 => "lz4",
        0x02 => "zstd",
        0x03 => "gzip",
        _ => "unknown",
    }
}

#[derive(Parser)]
struct Args {
    #[arg(long)]
    data_dir: PathBuf,

    /// Only show keys in this namespace (e.g. "search", "semantic").
    #[arg(long)]
    namespace: Option<String>,

    /// Emit one JSON object per line instead of the human-readable summary.
    #[arg(long)]
    json: bool,
}

#[derive(serde::Serialize)]
struct CacheEntryRow<'a> {
    key: &'a str,
    encoding: &'static str,
    payload_bytes: usize,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let db_path = args.data_dir.join("cache.redb");
    let db = Database::open(&db_path)
        .with_context(|| format!("opening {}", db_path.display()))?;
    let r = db.begin_read()?;
    let table = r.open_table(L2_TABLE)?;

    let mut count = 0usize;
    let mut total_bytes = 0usize;
    for item in table.iter()? {
        let (key, value) = item?;
        let key = key.value();
        if let Some(ns) = &args.namespace {
            if !key.starts_with(ns.as_str()) {
                continue;
            }
        }
        let stored = value.value();
        let encoding = stored.first().copied().unwrap_or(0xFF);
        let payload_len = stored.len().saturating_sub(1);
        if args.json {
            let row = CacheEntryRow {
                key,
                encoding: encoding_name(encoding),
                payload_bytes: payload_len,
            };
            println!("{}", serde_json::to_string(&row)?);
        } else {
            println!(
                "key={key} encoding={} payload_bytes={payload_len}",
                encoding_name(encoding)
            );
        }
        count += 1;
        total_bytes += payload_len;
    }
    if !args.json {
        println!("{count} entries, {total_bytes} total payload bytes");
    }
    Ok(())
}
