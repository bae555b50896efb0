//! Object I/O Adapter: a uniform GET/HEAD/PUT/multipart surface over an
//! S3-compatible store, carrying each `ObjectRef`'s own endpoint/region/
//! credentials so a source and a destination store can coexist in one
//! operation. Modeled on `examples/beshu-tech-deltaglider_proxy/src/
//! storage/traits.rs`'s `StorageBackend` trait shape (object-safe,
//! `async_trait`, typed error enum).

mod fake;
mod s3;

pub use fake::InMemoryObjectIo;
pub use s3::S3ObjectIo;

use crate::model::ObjectRef;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObjectIoError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("transient upstream error: {0}")]
    Transient(String),

    #[error("upstream error: {0}")]
    Upstream(String),
}

/// Size and existence of an object, as returned by `head`.
#[derive(Debug, Clone, Copy)]
pub struct ObjectMeta {
    pub content_length: u64,
}

/// A GET response: declared content length plus a chunked byte stream. The
/// stream is consumed at most once and is not seekable.
pub struct GetOutput {
    pub content_length: u64,
    pub body: BoxStream<'static, Result<Bytes, ObjectIoError>>,
}

/// Bookkeeping for one completed part of a multipart upload, carried
/// forward to `complete_multipart_upload` in `part_number` order.
#[derive(Debug, Clone)]
pub struct UploadedPart {
    pub part_number: i32,
    pub e_tag: String,
    pub checksum_sha256: String,
}

#[async_trait]
pub trait ObjectIo: Send + Sync {
    /// Returns `Err(ObjectIoError::NotFound)` for a 404-style absent
    /// object; any other failure is `Upstream` and must not be treated as
    /// "proceed" by callers doing idempotence checks (SPEC_FULL.md §4.2).
    async fn head(&self, obj: &ObjectRef) -> Result<ObjectMeta, ObjectIoError>;

    async fn get(&self, obj: &ObjectRef) -> Result<GetOutput, ObjectIoError>;

    /// Single-PUT path. `checksum_sha256`, when given, is the base64
    /// encoding of the raw sha256 digest, verified server-side.
    async fn put(
        &self,
        obj: &ObjectRef,
        body: Bytes,
        content_length: u64,
        checksum_sha256: Option<String>,
    ) -> Result<(), ObjectIoError>;

    async fn create_multipart_upload(&self, obj: &ObjectRef) -> Result<String, ObjectIoError>;

    async fn upload_part(
        &self,
        obj: &ObjectRef,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
        content_length: u64,
        checksum_sha256: String,
    ) -> Result<UploadedPart, ObjectIoError>;

    async fn complete_multipart_upload(
        &self,
        obj: &ObjectRef,
        upload_id: &str,
        parts: Vec<UploadedPart>,
    ) -> Result<(), ObjectIoError>;

    async fn abort_multipart_upload(
        &self,
        obj: &ObjectRef,
        upload_id: &str,
    ) -> Result<(), ObjectIoError>;
}
