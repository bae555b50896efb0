use super::{GetOutput, ObjectIo, ObjectIoError, ObjectMeta, UploadedPart};
use crate::model::ObjectRef;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

/// Identifies a distinct AWS SDK client configuration. Two `ObjectRef`s
/// that differ only by bucket/key share a client; source and destination
/// (typically different endpoint/region/credentials) do not.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    endpoint: Option<String>,
    region: String,
    access_key_id: Option<String>,
}

impl ClientKey {
    fn for_ref(obj: &ObjectRef) -> Self {
        Self {
            endpoint: obj.endpoint.clone(),
            region: obj.region.clone(),
            access_key_id: obj.credentials.as_ref().map(|c| c.access_key_id.clone()),
        }
    }
}

/// `ObjectIo` over `aws-sdk-s3`, lazily building and caching one client per
/// distinct endpoint/region/credential combination it sees. Client
/// construction is grounded on `examples/beshu-tech-deltaglider_proxy/src/
/// storage/s3.rs`'s `S3Backend::new` (region/endpoint/credentials wiring);
/// error mapping on its `get_object`'s `SdkError::ServiceError` ->
/// `StorageError::NotFound` pattern.
pub struct S3ObjectIo {
    clients: RwLock<HashMap<ClientKey, Client>>,
}

impl Default for S3ObjectIo {
    fn default() -> Self {
        Self::new()
    }
}

impl S3ObjectIo {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
        }
    }

    async fn client_for(&self, obj: &ObjectRef) -> Client {
        let key = ClientKey::for_ref(obj);
        if let Some(client) = self.clients.read().await.get(&key) {
            return client.clone();
        }

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(obj.region.clone()));

        if let Some(ref endpoint) = obj.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        if let Some(ref creds) = obj.credentials {
            let credentials = Credentials::new(
                &creds.access_key_id,
                &creds.secret_access_key,
                None,
                None,
                "carshift",
            );
            loader = loader.credentials_provider(credentials);
        }

        let sdk_config = loader.load().await;
        // Path-style addressing is required by most S3-compatible stores
        // reached through a custom endpoint (R2, MinIO); real AWS S3 uses
        // virtual-hosted style.
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(obj.endpoint.is_some())
            .build();
        let client = Client::from_conf(s3_config);

        self.clients.write().await.insert(key, client.clone());
        client
    }
}

fn upstream(op: &str, err: impl std::fmt::Display) -> ObjectIoError {
    ObjectIoError::Upstream(format!("{op} failed: {err}"))
}

/// Classifies a failed S3 call the same way `table/dynamodb.rs::classify`
/// classifies a failed DynamoDB call: throttling, request timeouts, and
/// transport-level dispatch failures are retryable; everything else is a
/// hard `Upstream` error.
fn classify<E, R>(op: &str, err: SdkError<E, R>) -> ObjectIoError
where
    E: std::error::Error + 'static,
{
    if matches!(err, SdkError::TimeoutError(_) | SdkError::DispatchFailure(_)) {
        return ObjectIoError::Transient(format!("{op}: {err}"));
    }

    let message = err.to_string();
    if message.contains("SlowDown")
        || message.contains("ThrottlingException")
        || message.contains("RequestTimeout")
        || message.contains("ServiceUnavailable")
        || message.contains("InternalError")
        || message.contains("500")
        || message.contains("503")
    {
        return ObjectIoError::Transient(format!("{op}: {err}"));
    }

    upstream(op, err)
}

#[async_trait]
impl ObjectIo for S3ObjectIo {
    #[instrument(skip(self, obj), fields(bucket = %obj.bucket, key = %obj.key))]
    async fn head(&self, obj: &ObjectRef) -> Result<ObjectMeta, ObjectIoError> {
        let client = self.client_for(obj).await;
        let result = client
            .head_object()
            .bucket(&obj.bucket)
            .key(&obj.key)
            .send()
            .await;

        match result {
            Ok(output) => Ok(ObjectMeta {
                content_length: output.content_length().unwrap_or(0).max(0) as u64,
            }),
            Err(SdkError::ServiceError(e)) if e.err().is_not_found() => {
                Err(ObjectIoError::NotFound(obj.key.clone()))
            }
            Err(e) => Err(classify("head_object", e)),
        }
    }

    #[instrument(skip(self, obj), fields(bucket = %obj.bucket, key = %obj.key))]
    async fn get(&self, obj: &ObjectRef) -> Result<GetOutput, ObjectIoError> {
        let client = self.client_for(obj).await;
        let result = client
            .get_object()
            .bucket(&obj.bucket)
            .key(&obj.key)
            .send()
            .await;

        let output = match result {
            Ok(output) => output,
            Err(SdkError::ServiceError(e))
                if matches!(
                    e.err(),
                    aws_sdk_s3::operation::get_object::GetObjectError::NoSuchKey(_)
                ) =>
            {
                return Err(ObjectIoError::NotFound(obj.key.clone()))
            }
            Err(e) => return Err(classify("get_object", e)),
        };

        let content_length = output.content_length().unwrap_or(0).max(0) as u64;
        let body = output
            .body
            .map(|chunk| chunk.map_err(|e| upstream("get_object body", e)));

        Ok(GetOutput {
            content_length,
            body: Box::pin(body),
        })
    }

    #[instrument(skip(self, obj, body), fields(bucket = %obj.bucket, key = %obj.key))]
    async fn put(
        &self,
        obj: &ObjectRef,
        body: Bytes,
        content_length: u64,
        checksum_sha256: Option<String>,
    ) -> Result<(), ObjectIoError> {
        let client = self.client_for(obj).await;
        let mut request = client
            .put_object()
            .bucket(&obj.bucket)
            .key(&obj.key)
            .content_length(content_length as i64)
            .body(ByteStream::from(body));

        if let Some(checksum) = checksum_sha256 {
            request = request
                .checksum_algorithm(aws_sdk_s3::types::ChecksumAlgorithm::Sha256)
                .checksum_sha256(checksum);
        }

        request.send().await.map_err(|e| classify("put_object", e))?;
        debug!("put {} bytes to {}/{}", content_length, obj.bucket, obj.key);
        Ok(())
    }

    #[instrument(skip(self, obj), fields(bucket = %obj.bucket, key = %obj.key))]
    async fn create_multipart_upload(&self, obj: &ObjectRef) -> Result<String, ObjectIoError> {
        let client = self.client_for(obj).await;
        let output = client
            .create_multipart_upload()
            .bucket(&obj.bucket)
            .key(&obj.key)
            .checksum_algorithm(aws_sdk_s3::types::ChecksumAlgorithm::Sha256)
            .send()
            .await
            .map_err(|e| classify("create_multipart_upload", e))?;

        output
            .upload_id
            .ok_or_else(|| ObjectIoError::Upstream("missing upload_id".to_string()))
    }

    #[instrument(skip(self, obj, body), fields(bucket = %obj.bucket, key = %obj.key, part_number))]
    async fn upload_part(
        &self,
        obj: &ObjectRef,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
        content_length: u64,
        checksum_sha256: String,
    ) -> Result<UploadedPart, ObjectIoError> {
        let client = self.client_for(obj).await;
        let output = client
            .upload_part()
            .bucket(&obj.bucket)
            .key(&obj.key)
            .upload_id(upload_id)
            .part_number(part_number)
            .content_length(content_length as i64)
            .checksum_sha256(&checksum_sha256)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| classify("upload_part", e))?;

        let e_tag = output
            .e_tag
            .ok_or_else(|| ObjectIoError::Upstream("missing e_tag on upload_part".to_string()))?;

        Ok(UploadedPart {
            part_number,
            e_tag,
            checksum_sha256,
        })
    }

    #[instrument(skip(self, obj, parts), fields(bucket = %obj.bucket, key = %obj.key))]
    async fn complete_multipart_upload(
        &self,
        obj: &ObjectRef,
        upload_id: &str,
        parts: Vec<UploadedPart>,
    ) -> Result<(), ObjectIoError> {
        let client = self.client_for(obj).await;
        let completed_parts: Vec<CompletedPart> = parts
            .into_iter()
            .map(|p| {
                CompletedPart::builder()
                    .part_number(p.part_number)
                    .e_tag(p.e_tag)
                    .checksum_sha256(p.checksum_sha256)
                    .build()
            })
            .collect();

        client
            .complete_multipart_upload()
            .bucket(&obj.bucket)
            .key(&obj.key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed_parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| classify("complete_multipart_upload", e))?;
        Ok(())
    }

    #[instrument(skip(self, obj), fields(bucket = %obj.bucket, key = %obj.key))]
    async fn abort_multipart_upload(
        &self,
        obj: &ObjectRef,
        upload_id: &str,
    ) -> Result<(), ObjectIoError> {
        let client = self.client_for(obj).await;
        client
            .abort_multipart_upload()
            .bucket(&obj.bucket)
            .key(&obj.key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| classify("abort_multipart_upload", e))?;
        Ok(())
    }
}
