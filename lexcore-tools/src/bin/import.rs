//! Bulk corpus import from a newline- or TSV-delimited file, then
//! `index_ensure` over the result.
//!
//! Input format: one entry per line, tab-separated: `surface[\tlang[\tfreq]]`.
//! `lang` defaults to `en`; `freq` defaults to `1.0`. Blank lines and lines
//! starting with `#` are skipped.

use anyhow::{Context, Result};
use clap::Parser;
use lexcore::{Config, CoreContext, Lang};
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
struct Args {
    /// Directory holding this core's persisted state (cache.redb, blobs.redb).
    #[arg(long)]
    data_dir: PathBuf,

    /// Newline/TSV vocabulary file to import.
    #[arg(long)]
    input: PathBuf,

    /// Name for the corpus being created.
    #[arg(long, default_value = "default")]
    corpus_name: String,

    /// Build the vector index in addition to the trie (requires wiring an
    /// embedding provider in-process; this CLI only exercises the trie path).
    #[arg(long)]
    with_vector: bool,
}

fn parse_lang(s: &str) -> Lang {
    match s {
        "en" => Lang::En,
        "fr" => Lang::Fr,
        "de" => Lang::De,
        "es" => Lang::Es,
        other => Lang::Other(other.to_string()),
    }
}

fn parse_line(line: &str) -> Option<(String, Lang, f32)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let mut parts = line.split('\t');
    let surface = parts.next()?.to_string();
    let lang = parts.next().map(parse_lang).unwrap_or(Lang::En);
    let freq = parts.next().and_then(|s| s.parse().ok()).unwrap_or(1.0);
    Some((surface, lang, freq))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let content = fs::read_to_string(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))?;
    let items: Vec<(String, Lang, f32)> = content.lines().filter_map(parse_line).collect();
    tracing::info!(count = items.len(), "parsed vocabulary entries");

    let ctx = CoreContext::open(&args.data_dir, Config::default())
        .context("opening core context")?;
    let corpus = ctx.corpus_create(&args.corpus_name, vec![]);
    let inserted = ctx.corpus_insert(&corpus, &items);
    let hash = ctx.corpus_hash(corpus.id)?;

    if args.with_vector {
        anyhow::bail!(
            "--with-vector requires an embedding provider wired in-process; \
             this CLI has none to inject, so it only builds the trie. \
             Use `index_ensure` from an embedding-provider-aware caller instead."
        );
    }
    let version = ctx.index_ensure(corpus.id, false, None).await?;
    println!(
        "corpus '{}': {} entries inserted ({} lines parsed), vocab_hash={}, index version={}",
        args.corpus_name,
        inserted,
        items.len(),
        hash,
        version
    );
    Ok(())
}
