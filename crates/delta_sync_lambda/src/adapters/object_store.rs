use aws_sdk_s3::primitives::ByteStream;
use chrono::{DateTime, Utc};
use delta_sync_core::dispatch::ArtifactStore;
use delta_sync_core::listing::{ListedObject, ObjectPage, ObjectStore};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use super::bridge::BlockingBridge;

/// Bytes left as-is in a `CopySource` header: unreserved characters and `/`.
const COPY_SOURCE_KEEP: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// `CopySource` value for an object, with the key URL-encoded as S3 expects.
pub fn copy_source(bucket: &str, key: &str) -> String {
    format!("{bucket}/{}", utf8_percent_encode(key, COPY_SOURCE_KEEP))
}

/// S3-backed listing and move operations.
#[derive(Clone, Debug)]
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bridge: BlockingBridge,
}

impl S3ObjectStore {
    pub fn new(client: aws_sdk_s3::Client, bridge: BlockingBridge) -> Self {
        Self { client, bridge }
    }
}

impl ObjectStore for S3ObjectStore {
    fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<&str>,
    ) -> Result<ObjectPage, String> {
        let request = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .set_continuation_token(continuation_token.map(str::to_string));

        let output = self
            .bridge
            .run(request.send())
            .map_err(|error| format!("failed to list objects: {error}"))?;

        let objects = output
            .contents()
            .iter()
            .filter_map(|object| {
                let key = object.key()?.to_string();
                Some(ListedObject {
                    key,
                    size: object.size().unwrap_or(0).max(0) as u64,
                    last_modified: object.last_modified().and_then(|modified| {
                        DateTime::<Utc>::from_timestamp(modified.secs(), modified.subsec_nanos())
                    }),
                })
            })
            .collect();
        let next_token = if output.is_truncated().unwrap_or(false) {
            output.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        Ok(ObjectPage {
            objects,
            next_token,
        })
    }

    fn head(&self, bucket: &str, key: &str) -> Result<bool, String> {
        let request = self.client.head_object().bucket(bucket).key(key);
        match self.bridge.run(request.send()) {
            Ok(_) => Ok(true),
            Err(error)
                if error
                    .as_service_error()
                    .map(|service| service.is_not_found())
                    .unwrap_or(false) =>
            {
                Ok(false)
            }
            Err(error) => Err(format!("failed to head object: {error}")),
        }
    }

    fn copy(&self, bucket: &str, source_key: &str, target_key: &str) -> Result<(), String> {
        let request = self
            .client
            .copy_object()
            .bucket(bucket)
            .copy_source(copy_source(bucket, source_key))
            .key(target_key);
        self.bridge
            .run(request.send())
            .map(|_| ())
            .map_err(|error| format!("failed to copy object: {error}"))
    }

    fn delete(&self, bucket: &str, key: &str) -> Result<(), String> {
        let request = self.client.delete_object().bucket(bucket).key(key);
        self.bridge
            .run(request.send())
            .map(|_| ())
            .map_err(|error| format!("failed to delete object from s3: {error}"))
    }
}

/// Audit records and fetched pages under `s3://{bucket}/{prefix}`.
#[derive(Clone, Debug)]
pub struct S3ArtifactStore {
    client: aws_sdk_s3::Client,
    bridge: BlockingBridge,
    bucket: String,
    prefix: String,
}

impl S3ArtifactStore {
    pub fn new(
        client: aws_sdk_s3::Client,
        bridge: BlockingBridge,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            client,
            bridge,
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }

    fn object_key(&self, key: &str) -> String {
        let prefix = self.prefix.trim_matches('/');
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}/{key}")
        }
    }
}

impl ArtifactStore for S3ArtifactStore {
    fn write_object(&self, key: &str, body: &[u8]) -> Result<(), String> {
        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .body(ByteStream::from(body.to_vec()));
        self.bridge
            .run(request.send())
            .map(|_| ())
            .map_err(|error| format!("failed to write object to s3: {error}"))
    }

    fn read_object(&self, key: &str) -> Result<Vec<u8>, String> {
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.object_key(key));
        self.bridge.run(async move {
            let output = request
                .send()
                .await
                .map_err(|error| format!("failed to read object from s3: {error}"))?;
            output
                .body
                .collect()
                .await
                .map(|bytes| bytes.into_bytes().to_vec())
                .map_err(|error| format!("failed to read object body: {error}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_source_keeps_plain_keys_readable() {
        assert_eq!(
            copy_source("landing-dev", "in/report_2024-05-01.csv"),
            "landing-dev/in/report_2024-05-01.csv"
        );
    }

    #[test]
    fn copy_source_encodes_reserved_and_non_ascii_bytes() {
        assert_eq!(
            copy_source("landing-dev", "in/a%2Fb_2024-05-01.csv"),
            "landing-dev/in/a%252Fb_2024-05-01.csv"
        );
        assert_eq!(
            copy_source("landing-dev", "in/q1 report+final.csv"),
            "landing-dev/in/q1%20report%2Bfinal.csv"
        );
        assert_eq!(
            copy_source("landing-dev", "in/caf\u{e9}.csv"),
            "landing-dev/in/caf%C3%A9.csv"
        );
    }
}
