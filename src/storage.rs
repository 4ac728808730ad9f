//! Storage layer for bot state and image payloads
//!
//! All cross-request state lives behind two traits: [`KeyValueStore`] for small
//! JSON values and [`BlobStore`] for binary image data. The production
//! implementation is backed by Cloudflare R2 / AWS S3; [`memory::InMemoryStore`]
//! serves local runs and tests.

pub mod memory;

use crate::config::Settings;
use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use aws_types::region::Region;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// Error retrieving object from S3
    #[error("S3 Get error: {0}")]
    S3Get(Box<SdkError<GetObjectError>>),
    /// Error putting object into S3
    #[error("S3 put error: {0}")]
    S3Put(String),
    /// Error deleting object from S3
    #[error("S3 delete error: {0}")]
    S3Delete(String),
    /// Error during JSON serialization or deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Standard I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Configuration error (missing credentials, etc.)
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Namespaced JSON key-value storage. Single-key writes are atomic, there are no transactions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value, `None` when the key is absent
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;
    /// Overwrite a value
    async fn put(&self, key: &str, value: Value) -> Result<(), StorageError>;
    /// Remove a value; removing an absent key succeeds
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Binary payload storage for images referenced from conversation contexts
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Read a blob, `None` when the key is absent
    async fn get_blob(&self, key: &str) -> Result<Option<Bytes>, StorageError>;
    /// Store a blob
    async fn put_blob(&self, key: &str, data: Bytes) -> Result<(), StorageError>;
    /// Remove a blob; removing an absent key succeeds
    async fn delete_blob(&self, key: &str) -> Result<(), StorageError>;
}

/// Reads and decodes a typed value for a read-modify-write.
///
/// Unparsable values count as absent, but read failures are returned so the
/// caller never overwrites data it could not see.
///
/// # Errors
///
/// Returns an error if the underlying read fails.
pub async fn read_json<T: DeserializeOwned>(
    kv: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StorageError> {
    let Some(value) = kv.get(key).await? else {
        return Ok(None);
    };
    match serde_json::from_value(value) {
        Ok(decoded) => Ok(Some(decoded)),
        Err(e) => {
            warn!(key, error = %e, "Discarding unparsable stored value");
            Ok(None)
        }
    }
}

/// Reads and decodes a typed value, treating read or parse failures as absent.
pub async fn load_json<T: DeserializeOwned>(kv: &dyn KeyValueStore, key: &str) -> Option<T> {
    match read_json(kv, key).await {
        Ok(decoded) => decoded,
        Err(e) => {
            warn!(key, error = %e, "Storage read failed, treating value as absent");
            None
        }
    }
}

/// Encodes and writes a typed value.
///
/// # Errors
///
/// Returns an error if serialization or the underlying write fails.
pub async fn save_json<T: Serialize + Sync>(
    kv: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    kv.put(key, serde_json::to_value(value)?).await
}

/// R2-backed storage implementation
pub struct R2Storage {
    client: Client,
    bucket: String,
}

impl R2Storage {
    /// Create a new R2 storage instance
    ///
    /// # Errors
    ///
    /// Returns an error if R2 configuration is missing.
    pub async fn new(settings: &Settings) -> Result<Self, StorageError> {
        let endpoint_url = settings
            .r2_endpoint_url
            .as_ref()
            .ok_or_else(|| StorageError::Config("R2_ENDPOINT_URL is missing".into()))?;
        let access_key = settings
            .r2_access_key_id
            .as_ref()
            .ok_or_else(|| StorageError::Config("R2_ACCESS_KEY_ID is missing".into()))?;
        let secret_key = settings
            .r2_secret_access_key
            .as_ref()
            .ok_or_else(|| StorageError::Config("R2_SECRET_ACCESS_KEY is missing".into()))?;
        let bucket = settings
            .r2_bucket_name
            .as_ref()
            .ok_or_else(|| StorageError::Config("R2_BUCKET_NAME is missing".into()))?;

        let credentials = Credentials::new(access_key, secret_key, None, None, "r2-storage");

        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new("auto"))
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .endpoint_url(endpoint_url)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(s3_config),
            bucket: bucket.clone(),
        })
    }

    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::S3Put(e.to_string()))?;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(output) => {
                let data = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| StorageError::Io(std::io::Error::other(e)))?
                    .into_bytes();
                Ok(Some(data))
            }
            Err(SdkError::ServiceError(err)) if err.err().is_no_such_key() => Ok(None),
            Err(e) => Err(StorageError::S3Get(Box::new(e))),
        }
    }

    async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::S3Delete(e.to_string()))?;
        Ok(())
    }

    /// Check connection to R2 storage
    ///
    /// # Errors
    ///
    /// Returns a description of the failure if the bucket cannot be reached.
    pub async fn check_connection(&self) -> Result<(), String> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => {
                info!("Successfully connected to R2 storage.");
                Ok(())
            }
            Err(e) => {
                let err_msg = format!("R2 connectivity test failed: {e:#?}");
                error!("{}", err_msg);
                Err(err_msg)
            }
        }
    }
}

#[async_trait]
impl KeyValueStore for R2Storage {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        match self.get_object(&kv_object_key(key)).await? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let body = serde_json::to_vec(&value)?;
        self.put_object(&kv_object_key(key), body, "application/json")
            .await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.delete_object(&kv_object_key(key)).await
    }
}

#[async_trait]
impl BlobStore for R2Storage {
    async fn get_blob(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
        self.get_object(&blob_object_key(key)).await
    }

    async fn put_blob(&self, key: &str, data: Bytes) -> Result<(), StorageError> {
        self.put_object(&blob_object_key(key), data.to_vec(), "application/octet-stream")
            .await
    }

    async fn delete_blob(&self, key: &str) -> Result<(), StorageError> {
        self.delete_object(&blob_object_key(key)).await
    }
}

fn kv_object_key(key: &str) -> String {
    format!("kv/{key}.json")
}

fn blob_object_key(key: &str) -> String {
    format!("blobs/{key}")
}

/// Prefix shared by every image blob key
pub const IMAGE_BLOB_PREFIX: &str = "image_base64_";

/// KV key of the operator-provided system prompt
pub const SYSTEM_PROMPT_KEY: &str = "system_prompt";

/// KV key of the optional knowledge base appended to the system prompt
pub const KNOWLEDGE_BASE_KEY: &str = "knowledge_base";

/// Returns the key for a (group, user) conversation context
#[must_use]
pub fn context_key(group_id: i64, user_id: i64) -> String {
    format!("context:{group_id}:{user_id}")
}

/// Returns the key for a group's general cooldown record
#[must_use]
pub fn cooldown_key(group_id: i64) -> String {
    format!("cooldown:{group_id}")
}

/// Returns the key for a group's search cooldown record
#[must_use]
pub fn search_cooldown_key(group_id: i64) -> String {
    format!("cooldown:search:{group_id}")
}

/// Returns the key for a deferred deletion task
#[must_use]
pub fn deletion_task_key(chat_id: i64, command_message_id: i32, bot_reply_message_id: i32) -> String {
    format!("delete_message:{chat_id}:{command_message_id}:{bot_reply_message_id}")
}

/// Returns the key holding the id of the bot's latest reply to a (group, user) pair
#[must_use]
pub fn last_bot_message_key(group_id: i64, user_id: i64) -> String {
    format!("last_bot_message_id:{group_id}:{user_id}")
}

/// Generates a fresh, unique image blob key
#[must_use]
pub fn new_image_blob_key() -> String {
    format!("{IMAGE_BLOB_PREFIX}{}", Uuid::new_v4().as_simple())
}
