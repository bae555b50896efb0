//! Request handlers for the three worker operations (SPEC_FULL.md §6).
//! Grounded on the teacher's `AppState`/query-extractor shape
//! (`examples/beshu-tech-deltaglider_proxy/src/api/handlers/mod.rs`), with
//! the S3-bucket-surface logic replaced by the Hash/Copy/Reindex contract.

use crate::config::Config;
use crate::errors::WorkerError;
use crate::model::{ObjectRef, RootLink, ShardRef};
use crate::objectio::ObjectIo;
use crate::table::BlockIndexTable;
use crate::worker;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use cid::Cid;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

/// Shared application state, injected into every handler via `State`.
pub struct AppState {
    pub config: Config,
    pub io: Arc<dyn ObjectIo>,
    pub table: Arc<dyn BlockIndexTable>,
}

#[derive(Debug, Deserialize)]
pub struct HashQuery {
    pub region: String,
    pub bucket: String,
    pub key: String,
}

#[derive(Debug, Serialize)]
struct CidBody {
    #[serde(rename = "/")]
    slash: String,
}

#[derive(Debug, Serialize)]
struct HashResponse {
    ok: bool,
    cid: CidBody,
}

/// `GET /hash?region=&bucket=&key=` → `{ok, cid: {"/": "<cid>"}}`.
pub async fn hash_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashQuery>,
) -> Result<Response, WorkerError> {
    state
        .config
        .validate_source(&query.region, &query.bucket, &query.key)?;

    let src = ObjectRef::new(query.region, query.bucket, query.key);
    let outcome = worker::hash(&src, state.io.as_ref()).await?;

    Ok(Json(HashResponse {
        ok: true,
        cid: CidBody {
            slash: outcome.cid.to_string(),
        },
    })
    .into_response())
}

#[derive(Debug, Deserialize)]
pub struct CopyQuery {
    pub region: String,
    pub bucket: String,
    pub key: String,
    pub shard: String,
    pub root: String,
}

#[derive(Debug, Serialize)]
struct OkResponse {
    ok: bool,
}

/// `GET /copy?region=&bucket=&key=&shard=&root=` → `{ok: true}`.
pub async fn copy_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CopyQuery>,
) -> Result<Response, WorkerError> {
    state
        .config
        .validate_source(&query.region, &query.bucket, &query.key)?;

    let shard_cid = parse_cid(&query.shard)?;
    let root_cid = parse_cid(&query.root)?;
    let root = RootLink::normalize(root_cid);

    let src_obj = ObjectRef::new(query.region, query.bucket, query.key);
    let src = ShardRef::new(src_obj, shard_cid);
    let shard_name = src.shard_name();

    let dest = state.config.carpark_object(&shard_name);
    let index_dest = state.config.satnav_object(&shard_name);
    let link_dest = state.config.dudewhere_object(&root.to_string(), &shard_name);

    worker::copy(
        &src,
        &dest,
        &index_dest,
        &link_dest,
        Default::default(),
        state.io.as_ref(),
    )
    .await?;

    Ok(Json(OkResponse { ok: true }).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ReindexQuery {
    pub region: String,
    pub bucket: String,
    pub key: String,
    pub shard: String,
}

#[derive(Debug, Serialize)]
struct ReindexResponse {
    ok: bool,
    updated: u64,
}

/// `GET /reindex?region=&bucket=&key=&shard=` → `{ok: true, updated: N}`.
pub async fn reindex_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReindexQuery>,
) -> Result<Response, WorkerError> {
    state
        .config
        .validate_source(&query.region, &query.bucket, &query.key)?;

    let shard_cid = parse_cid(&query.shard)?;
    let src_obj = ObjectRef::new(query.region, query.bucket, query.key);
    let src = ShardRef::new(src_obj, shard_cid);

    let outcome = worker::reindex(&src, state.table.as_ref(), state.io.as_ref()).await?;

    Ok(Json(ReindexResponse {
        ok: true,
        updated: outcome.updated,
    })
    .into_response())
}

fn parse_cid(raw: &str) -> Result<Cid, WorkerError> {
    Cid::from_str(raw).map_err(|e| WorkerError::validation(format!("invalid cid {raw}: {e}")))
}
