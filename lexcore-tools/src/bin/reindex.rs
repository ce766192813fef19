//! Force a rebuild of the trie index for a freshly re-imported corpus.
//!
//! Since `CorpusRegistry` is in-memory only (indices, not raw vocabulary,
//! are what's durably versioned — see DESIGN.md), "reindex" for an offline
//! operator means: re-read the same vocabulary file, re-insert it into a
//! fresh corpus, invalidate any cached generation metadata blob for that
//! resource id, then call `index_ensure` again so a new version is recorded
//! in the blob store's supersession chain even if `vocab_hash` is
//! unchanged from the operator's point of view.

use anyhow::{Context, Result};
use clap::Parser;
use lexcore::{Config, CoreContext, Lang};
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
struct Args {
    #[arg(long)]
    data_dir: PathBuf,
    #[arg(long)]
    input: PathBuf,
    #[arg(long, default_value = "default")]
    corpus_name: String,
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

    let ctx = CoreContext::open(&args.data_dir, Config::default())
        .context("opening core context")?;

    let invalidated = ctx
        .cache_invalidate(&format!("trie:{}*", args.corpus_name))
        .await?;
    tracing::info!(invalidated, "cleared cached trie generation before rebuild");

    let corpus = ctx.corpus_create(&args.corpus_name, vec![]);
    ctx.corpus_insert(&corpus, &items);
    let hash = ctx.corpus_hash(corpus.id)?;
    let version = ctx.index_ensure(corpus.id, false, None).await?;

    println!(
        "reindexed corpus '{}': vocab_hash={}, index version={}",
        args.corpus_name, hash, version
    );
    Ok(())
}
