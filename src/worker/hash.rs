//! Shard Hasher: stream a named source object and return its content
//! identifier, without ever buffering the whole body. Grounded on the
//! incremental-hash-while-streaming shape of `examples/other_examples/
//! 462430b4_sugyan-atrium__atrium-repo-src-car.rs.rs`'s block-digest
//! verification loop.

use crate::model::{sha256_multihash, ObjectRef, CAR_CODEC};
use crate::objectio::ObjectIo;
use cid::Cid;
use futures::StreamExt;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashOutcome {
    pub cid: Cid,
}

/// Fetches `src`'s body as a chunked stream, feeds every chunk into an
/// incremental sha256 hasher, and wraps the finalized digest as
/// `cid(version=1, codec=CAR_CODEC, multihash=sha256(body))`.
pub async fn hash(src: &ObjectRef, io: &dyn ObjectIo) -> Result<HashOutcome, crate::errors::WorkerError> {
    let output = io.get(src).await?;
    if output.content_length == 0 {
        return Err(crate::errors::WorkerError::not_found(format!(
            "{} has zero content length",
            src.key
        )));
    }
    let mut hasher = Sha256::new();
    let mut body = output.body;
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        hasher.update(&chunk);
    }
    let digest = hasher.finalize();
    let mh = sha256_multihash(&digest);
    Ok(HashOutcome {
        cid: Cid::new_v1(CAR_CODEC, mh),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objectio::InMemoryObjectIo;
    use sha2::{Digest, Sha256};

    #[tokio::test]
    async fn hash_matches_sha256_of_body() {
        let io = InMemoryObjectIo::new();
        let src = ObjectRef::new("us-east-2", "dotstorage-prod-0", "complete/root.car");
        let body = b"a CAR shard's worth of bytes".to_vec();
        io.seed(&src, body.clone());

        let outcome = hash(&src, &io).await.unwrap();

        assert_eq!(outcome.cid.codec(), CAR_CODEC);
        let expected = Sha256::digest(&body);
        assert_eq!(outcome.cid.hash().digest(), expected.as_slice());
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let io = InMemoryObjectIo::new();
        let src = ObjectRef::new("us-east-2", "dotstorage-prod-0", "complete/missing.car");
        let err = hash(&src, &io).await.unwrap_err();
        assert!(matches!(err, crate::errors::WorkerError::NotFound(_)));
    }

    #[tokio::test]
    async fn zero_length_object_is_not_found() {
        let io = InMemoryObjectIo::new();
        let src = ObjectRef::new("us-east-2", "dotstorage-prod-0", "complete/empty.car");
        io.seed(&src, Vec::new());
        let err = hash(&src, &io).await.unwrap_err();
        assert!(matches!(err, crate::errors::WorkerError::NotFound(_)));
    }
}
