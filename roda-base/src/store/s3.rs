use std::fmt;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use rusoto_core::{Region, RusotoError};
use rusoto_s3::{
    CopyObjectRequest, DeleteObjectRequest, GetObjectError, GetObjectRequest, ListObjectsV2Request,
    PutObjectRequest, S3Client, S3,
};

use super::{ObjectStore, ObjectStoreError};

/// Object store backed by an S3 bucket. Credentials come from the ambient
/// AWS environment, as for every other AWS client in the pipeline.
#[derive(Clone)]
pub struct S3Store {
    bucket: String,
    client: S3Client,
}

impl fmt::Debug for S3Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Store")
            .field("bucket", &self.bucket)
            .finish()
    }
}

impl S3Store {
    /// Adapter over the given bucket.
    pub fn new(bucket: String, region: Region) -> Self {
        Self {
            bucket,
            client: S3Client::new(region),
        }
    }

    /// The bucket this store writes to.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

fn request_err<E: std::error::Error>(e: RusotoError<E>) -> ObjectStoreError {
    ObjectStoreError::Request(e.to_string())
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ObjectStoreError> {
        let req = GetObjectRequest {
            bucket: self.bucket.clone(),
            key: key.to_owned(),
            ..Default::default()
        };
        match self.client.get_object(req).await {
            Ok(res) => match res.body {
                Some(body) => Ok(Some(
                    body.map_ok(|b| b.to_vec())
                        .try_concat()
                        .await
                        .map_err(ObjectStoreError::Io)?,
                )),
                None => Ok(Some(Vec::new())),
            },
            Err(RusotoError::Service(GetObjectError::NoSuchKey(_))) => Ok(None),
            Err(RusotoError::Unknown(resp)) if resp.status.as_u16() == 404 => Ok(None),
            Err(e) => Err(request_err(e)),
        }
    }

    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), ObjectStoreError> {
        let req = PutObjectRequest {
            bucket: self.bucket.clone(),
            key: key.to_owned(),
            body: Some(body.into()),
            content_type: Some(content_type.to_owned()),
            ..Default::default()
        };
        self.client.put_object(req).await.map_err(request_err)?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, ObjectStoreError> {
        let mut keys = Vec::new();
        let mut continuation_token = None;
        loop {
            let req = ListObjectsV2Request {
                bucket: self.bucket.clone(),
                prefix: Some(prefix.to_owned()),
                continuation_token: continuation_token.clone(),
                ..Default::default()
            };
            let res = self.client.list_objects_v2(req).await.map_err(request_err)?;
            keys.extend(
                res.contents
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|o| o.key),
            );
            match res.next_continuation_token {
                Some(token) => continuation_token = Some(token),
                None => break,
            }
        }
        Ok(keys)
    }

    async fn copy(&self, from: &str, to: &str) -> Result<(), ObjectStoreError> {
        let req = CopyObjectRequest {
            bucket: self.bucket.clone(),
            copy_source: format!("{}/{}", self.bucket, from),
            key: to.to_owned(),
            ..Default::default()
        };
        self.client.copy_object(req).await.map_err(request_err)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        let req = DeleteObjectRequest {
            bucket: self.bucket.clone(),
            key: key.to_owned(),
            ..Default::default()
        };
        self.client.delete_object(req).await.map_err(request_err)?;
        Ok(())
    }
}
