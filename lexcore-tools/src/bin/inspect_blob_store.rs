//! Read-only dump of a blob store's metadata table: open the database
//! directly, iterate a known table, print a summary row per entry. Table
//! name/shape must stay in lockstep with `lexcore::blobstore`'s private
//! `METADATA_TABLE` definition.

use anyhow::{Context, Result};
use clap::Parser;
use lexcore::Blob;
use redb::{Database, ReadableTable, TableDefinition};
use std::path::PathBuf;

const METADATA_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("blob_metadata");

#[derive(Parser)]
struct Args {
    /// Directory holding this core's persisted state.
    #[arg(long)]
    data_dir: PathBuf,

    /// Only show blobs for this resource_id, if given.
    #[arg(long)]
    resource_id: Option<String>,

    /// Emit one JSON object per line instead of the human-readable summary.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let db_path = args.data_dir.join("blobs.redb");
    let db = Database::open(&db_path)
        .with_context(|| format!("opening {}", db_path.display()))?;
    let r = db.begin_read()?;
    let table = r.open_table(METADATA_TABLE)?;

    let mut count = 0usize;
    for item in table.iter()? {
        let (id, raw) = item?;
        let blob: Blob = bincode::deserialize(raw.value())
            .context("decoding blob metadata record")?;
        if let Some(want) = &args.resource_id {
            if &blob.resource_id != want {
                continue;
            }
        }
        if args.json {
            println!("{}", serde_json::to_string(&blob)?);
        } else {
            println!(
                "id={} resource_id={:?} resource_type={:?} version={} is_latest={} data_hash={} supersedes={:?} superseded_by={:?}",
                id.value(),
                blob.resource_id,
                blob.resource_type,
                blob.version,
                blob.is_latest,
                &blob.data_hash[..blob.data_hash.len().min(12)],
                blob.supersedes,
                blob.superseded_by,
            );
        }
        count += 1;
    }
    if !args.json {
        println!("{count} blob(s)");
    }
    Ok(())
}
