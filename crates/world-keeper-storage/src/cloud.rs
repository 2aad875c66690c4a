//! S3-compatible object storage (Cloudflare R2, AWS S3, MinIO).
//!
//! Each record is one object at `<prefix><id>`. The id encodes creation
//! time and filename, so listing never needs per-object metadata reads.

use std::fmt::Debug;

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use world_keeper_core::retention::order_newest_first;
use world_keeper_core::{Error, Result};

use crate::record::{is_plain_name, parse_record_id, record_id, sha256_hex, ArchiveRecord, RecordSummary};
use crate::store::{Collection, Connector};

const SHA256_METADATA: &str = "sha256";

#[derive(Debug, Clone)]
pub struct R2Config {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub prefix: String,
}

#[derive(Debug, Clone)]
pub struct R2Client {
    client: Client,
    bucket: String,
}

impl R2Client {
    pub async fn new(config: R2Config) -> Self {
        let creds = Credentials::new(
            config.access_key,
            config.secret_key,
            None,
            None,
            "world-keeper",
        );
        let shared = aws_credential_types::provider::SharedCredentialsProvider::new(creds);
        let sdk_config = aws_config::from_env()
            .region(Region::new("auto"))
            .endpoint_url(config.endpoint)
            .credentials_provider(shared)
            .load()
            .await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build();
        Self {
            client: Client::from_conf(s3_config),
            bucket: config.bucket,
        }
    }

    pub async fn upload_bytes(&self, key: &str, payload: Vec<u8>, sha256: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/zip")
            .metadata(SHA256_METADATA, sha256)
            .body(ByteStream::from(payload))
            .send()
            .await
            .map_err(|e| classify(e, format!("upload {key}"), Error::WriteFailed))?;
        Ok(())
    }

    /// `None` when the key does not exist.
    pub async fn download_bytes(&self, key: &str) -> Result<Option<(Vec<u8>, Option<String>)>> {
        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(err)
                if err
                    .as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false) =>
            {
                return Ok(None);
            }
            Err(err) => return Err(classify(err, format!("download {key}"), Error::ReadFailed)),
        };

        let sha256 = output
            .metadata()
            .and_then(|m| m.get(SHA256_METADATA))
            .cloned();
        let body = output
            .body
            .collect()
            .await
            .map_err(|e| Error::read(format_args!("download {key}"), e))?;
        Ok(Some((body.into_bytes().to_vec(), sha256)))
    }

    /// `(key, size)` for every object under `prefix`.
    pub async fn list_keys(&self, prefix: &str) -> Result<Vec<(String, u64)>> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(|e| classify(e, format!("list {prefix}"), Error::ReadFailed))?;
            for object in output.contents() {
                if let Some(key) = object.key() {
                    keys.push((key.to_string(), object.size().unwrap_or(0).max(0) as u64));
                }
            }
            match output.next_continuation_token() {
                Some(next) => token = Some(next.to_string()),
                None => break,
            }
        }
        Ok(keys)
    }

    pub async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(e, format!("delete {key}"), Error::WriteFailed))?;
        Ok(())
    }
}

// Transport problems mean the store is unreachable; anything else is a
// failure of the operation itself.
fn classify<E, R>(err: SdkError<E, R>, context: String, otherwise: fn(String) -> Error) -> Error
where
    E: std::error::Error + Send + Sync + 'static,
    R: Debug,
{
    let detail = format!("{context}: {}", DisplayErrorContext(&err));
    match err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => Error::ConnectionFailed(detail),
        _ => otherwise(detail),
    }
}

/// Newest-first summaries for the keys that carry a record id under
/// `prefix`. Foreign objects in the bucket are skipped.
fn summarize_keys(prefix: &str, keys: Vec<(String, u64)>) -> Vec<RecordSummary> {
    let mut summaries: Vec<RecordSummary> = keys
        .into_iter()
        .filter_map(|(key, size_bytes)| {
            let id = key.strip_prefix(prefix)?.to_string();
            let (created_at, filename) = parse_record_id(&id)?;
            Some(RecordSummary {
                id,
                filename,
                created_at,
                size_bytes,
            })
        })
        .collect();
    order_newest_first(&mut summaries, |r| (r.created_at, r.id.clone()));
    summaries
}

#[derive(Debug, Clone)]
pub struct R2Connector {
    config: R2Config,
}

impl R2Connector {
    pub fn new(config: R2Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for R2Connector {
    async fn connect(&self) -> Result<Box<dyn Collection>> {
        let client = R2Client::new(self.config.clone()).await;
        Ok(Box::new(R2Collection {
            client,
            prefix: self.config.prefix.clone(),
        }))
    }

    fn describe(&self) -> String {
        format!("r2:{}/{}", self.config.bucket, self.config.prefix)
    }
}

struct R2Collection {
    client: R2Client,
    prefix: String,
}

impl R2Collection {
    fn key(&self, id: &str) -> String {
        format!("{}{id}", self.prefix)
    }
}

#[async_trait]
impl Collection for R2Collection {
    async fn insert(&mut self, record: ArchiveRecord) -> Result<String> {
        if !is_plain_name(&record.filename) {
            return Err(Error::WriteFailed(format!(
                "invalid backup filename: {}",
                record.filename
            )));
        }
        let id = record_id(record.created_at, &record.filename);
        let key = self.key(&id);
        self.client
            .upload_bytes(&key, record.payload, &record.sha256)
            .await?;
        Ok(id)
    }

    async fn find(&mut self, skip: usize) -> Result<Vec<RecordSummary>> {
        let keys = self.client.list_keys(&self.prefix).await?;
        Ok(summarize_keys(&self.prefix, keys)
            .into_iter()
            .skip(skip)
            .collect())
    }

    async fn fetch(&mut self, id: &str) -> Result<Option<ArchiveRecord>> {
        let Some((created_at, filename)) = parse_record_id(id) else {
            return Ok(None);
        };
        let Some((payload, sha256)) = self.client.download_bytes(&self.key(id)).await? else {
            return Ok(None);
        };
        let sha256 = sha256.unwrap_or_else(|| sha256_hex(&payload));
        Ok(Some(ArchiveRecord {
            filename,
            created_at,
            size_bytes: payload.len() as u64,
            sha256,
            payload,
        }))
    }

    async fn delete(&mut self, id: &str) -> Result<()> {
        let key = self.key(id);
        self.client.delete_object(&key).await
    }
}
