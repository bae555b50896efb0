use super::{GetOutput, ObjectIo, ObjectIoError, ObjectMeta, UploadedPart};
use crate::model::ObjectRef;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Mutex;

struct InFlightUpload {
    key: String,
    parts: Vec<(i32, Bytes)>,
}

/// In-memory `ObjectIo` used by worker tests so the copy/reindex scenarios
/// in SPEC_FULL.md §8 can run without a live S3-compatible store. Mirrors
/// the teacher's in-memory `MultipartStore` test approach (`src/
/// multipart.rs`'s `#[cfg(test)] mod tests`) but implements the production
/// trait directly rather than a parallel surface.
#[derive(Default)]
pub struct InMemoryObjectIo {
    objects: Mutex<HashMap<String, Bytes>>,
    uploads: Mutex<HashMap<String, InFlightUpload>>,
    put_count: Mutex<u64>,
}

fn object_key(obj: &ObjectRef) -> String {
    format!("{}/{}/{}", obj.region, obj.bucket, obj.key)
}

impl InMemoryObjectIo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, obj: &ObjectRef, bytes: impl Into<Bytes>) {
        self.objects
            .lock()
            .unwrap()
            .insert(object_key(obj), bytes.into());
    }

    pub fn get_stored(&self, obj: &ObjectRef) -> Option<Bytes> {
        self.objects.lock().unwrap().get(&object_key(obj)).cloned()
    }

    /// Number of single-PUT or completed multipart writes observed so far;
    /// used by idempotence tests to assert no additional PUTs occurred.
    pub fn put_count(&self) -> u64 {
        *self.put_count.lock().unwrap()
    }

    pub fn has_pending_upload(&self, upload_id: &str) -> bool {
        self.uploads.lock().unwrap().contains_key(upload_id)
    }
}

#[async_trait]
impl ObjectIo for InMemoryObjectIo {
    async fn head(&self, obj: &ObjectRef) -> Result<ObjectMeta, ObjectIoError> {
        self.objects
            .lock()
            .unwrap()
            .get(&object_key(obj))
            .map(|b| ObjectMeta {
                content_length: b.len() as u64,
            })
            .ok_or_else(|| ObjectIoError::NotFound(obj.key.clone()))
    }

    async fn get(&self, obj: &ObjectRef) -> Result<GetOutput, ObjectIoError> {
        let bytes = self
            .objects
            .lock()
            .unwrap()
            .get(&object_key(obj))
            .cloned()
            .ok_or_else(|| ObjectIoError::NotFound(obj.key.clone()))?;

        let content_length = bytes.len() as u64;
        let body = futures::stream::once(async move { Ok(bytes) });
        Ok(GetOutput {
            content_length,
            body: Box::pin(body),
        })
    }

    async fn put(
        &self,
        obj: &ObjectRef,
        body: Bytes,
        _content_length: u64,
        _checksum_sha256: Option<String>,
    ) -> Result<(), ObjectIoError> {
        self.objects
            .lock()
            .unwrap()
            .insert(object_key(obj), body);
        *self.put_count.lock().unwrap() += 1;
        Ok(())
    }

    async fn create_multipart_upload(&self, obj: &ObjectRef) -> Result<String, ObjectIoError> {
        let upload_id = format!("fake-upload-{}", object_key(obj).len() + self.uploads.lock().unwrap().len());
        self.uploads.lock().unwrap().insert(
            upload_id.clone(),
            InFlightUpload {
                key: object_key(obj),
                parts: Vec::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _obj: &ObjectRef,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
        _content_length: u64,
        checksum_sha256: String,
    ) -> Result<UploadedPart, ObjectIoError> {
        let mut uploads = self.uploads.lock().unwrap();
        let upload = uploads
            .get_mut(upload_id)
            .ok_or_else(|| ObjectIoError::Upstream("unknown upload id".to_string()))?;
        upload.parts.push((part_number, body));
        Ok(UploadedPart {
            part_number,
            e_tag: format!("etag-{part_number}"),
            checksum_sha256,
        })
    }

    async fn complete_multipart_upload(
        &self,
        _obj: &ObjectRef,
        upload_id: &str,
        mut parts: Vec<UploadedPart>,
    ) -> Result<(), ObjectIoError> {
        let mut uploads = self.uploads.lock().unwrap();
        let upload = uploads
            .remove(upload_id)
            .ok_or_else(|| ObjectIoError::Upstream("unknown upload id".to_string()))?;

        parts.sort_by_key(|p| p.part_number);
        let mut assembled = Vec::new();
        let mut by_number: HashMap<i32, Bytes> = upload.parts.into_iter().collect();
        for part in &parts {
            let chunk = by_number
                .remove(&part.part_number)
                .ok_or_else(|| ObjectIoError::Upstream("missing uploaded part".to_string()))?;
            assembled.extend_from_slice(&chunk);
        }

        self.objects
            .lock()
            .unwrap()
            .insert(upload.key, Bytes::from(assembled));
        *self.put_count.lock().unwrap() += 1;
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        _obj: &ObjectRef,
        upload_id: &str,
    ) -> Result<(), ObjectIoError> {
        self.uploads.lock().unwrap().remove(upload_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn head_absent_is_not_found() {
        let io = InMemoryObjectIo::new();
        let obj = ObjectRef::new("us-east-2", "b", "k.car");
        assert!(matches!(io.head(&obj).await, Err(ObjectIoError::NotFound(_))));
    }

    #[tokio::test]
    async fn put_then_head_succeeds() {
        let io = InMemoryObjectIo::new();
        let obj = ObjectRef::new("us-east-2", "b", "k.car");
        io.put(&obj, Bytes::from_static(b"hi"), 2, None).await.unwrap();
        let meta = io.head(&obj).await.unwrap();
        assert_eq!(meta.content_length, 2);
    }

    #[tokio::test]
    async fn multipart_reassembles_in_part_number_order() {
        let io = InMemoryObjectIo::new();
        let obj = ObjectRef::new("us-east-2", "b", "k.car");
        let upload_id = io.create_multipart_upload(&obj).await.unwrap();
        let p2 = io
            .upload_part(&obj, &upload_id, 2, Bytes::from_static(b"world"), 5, "c2".into())
            .await
            .unwrap();
        let p1 = io
            .upload_part(&obj, &upload_id, 1, Bytes::from_static(b"hello "), 6, "c1".into())
            .await
            .unwrap();
        io.complete_multipart_upload(&obj, &upload_id, vec![p2, p1])
            .await
            .unwrap();

        let stored = io.get_stored(&obj).unwrap();
        assert_eq!(stored.as_ref(), b"hello world");
    }
}
