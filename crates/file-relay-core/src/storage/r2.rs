//! R2-backed storage.
//!
//! Records are JSON objects. Mutable records (accounts, tokens) are updated with
//! ETag-conditional writes so concurrent updates of one record cannot both win.
//! File records are immutable and served from a read-through cache.

use super::{
    account_key, file_key, token_key, user_id_from_account_key, user_tokens_prefix, RelayStore,
    StorageError, ACCOUNTS_PREFIX, SHORTLINK_SETTINGS_KEY, TOKENS_PREFIX,
};
use crate::config::{RelaySettings, CAS_MAX_ATTEMPTS, FILE_CACHE_MAX_SIZE};
use crate::model::{
    Account, FileHandle, FileRecord, ShortlinkSettings, UserId, VerificationToken,
};
use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use aws_types::region::Region;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Condition attached to a write
enum Precondition {
    /// Object must still carry this ETag
    IfMatch(String),
    /// Object must not exist yet
    IfAbsent,
}

/// R2-backed storage implementation
pub struct R2Storage {
    client: Client,
    bucket: String,
    file_cache: Cache<FileHandle, Arc<FileRecord>>,
}

impl R2Storage {
    /// Create a new R2 storage instance
    ///
    /// # Errors
    ///
    /// Returns an error if R2 configuration is missing.
    pub async fn new(settings: &RelaySettings) -> Result<Self, StorageError> {
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

        Ok(Self::with_client(Client::from_conf(s3_config), bucket))
    }

    fn with_client(client: Client, bucket: &str) -> Self {
        let file_cache = Cache::builder()
            .max_capacity(FILE_CACHE_MAX_SIZE)
            .time_to_idle(Duration::from_secs(60 * 60))
            .build();

        Self {
            client,
            bucket: bucket.to_string(),
            file_cache,
        }
    }

    /// Load a JSON object together with its ETag
    async fn load_versioned<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<(T, String)>, StorageError> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(output) => {
                let etag = output.e_tag().unwrap_or_default().to_string();
                let data = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| StorageError::Io(std::io::Error::other(e)))?
                    .into_bytes();
                Ok(Some((serde_json::from_slice(&data)?, etag)))
            }
            Err(SdkError::ServiceError(err)) if err.err().is_no_such_key() => Ok(None),
            Err(e) => Err(StorageError::S3Get(Box::new(e))),
        }
    }

    async fn load_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        Ok(self.load_versioned(key).await?.map(|(value, _)| value))
    }

    /// Save data as JSON. Returns `false` when the precondition did not hold.
    async fn save_json<T: Serialize + Sync>(
        &self,
        key: &str,
        data: &T,
        precondition: Option<&Precondition>,
    ) -> Result<bool, StorageError> {
        let body = serde_json::to_vec_pretty(data)?;

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type("application/json");
        request = match precondition {
            Some(Precondition::IfMatch(etag)) => request.if_match(etag.as_str()),
            Some(Precondition::IfAbsent) => request.if_none_match("*"),
            None => request,
        };

        match request.send().await {
            Ok(_) => Ok(true),
            Err(e) if is_precondition_failure(&e) => Ok(false),
            Err(e) => Err(StorageError::S3Put(e.to_string())),
        }
    }

    /// Read-modify-write a record under an ETag guard, retrying lost races.
    ///
    /// A missing record is created from `seed`; without a seed the call returns
    /// `Ok(None)`. Nothing is written when `modify` leaves an existing record unchanged.
    async fn modify_versioned<T, R, F>(
        &self,
        key: &str,
        seed: Option<T>,
        mut modify: F,
    ) -> Result<Option<R>, StorageError>
    where
        T: Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync,
        R: Send,
        F: FnMut(&mut T) -> R + Send,
    {
        for attempt in 1..=CAS_MAX_ATTEMPTS {
            let (original, precondition) = match self.load_versioned::<T>(key).await? {
                Some((value, etag)) => (value, Precondition::IfMatch(etag)),
                None => match &seed {
                    Some(value) => (value.clone(), Precondition::IfAbsent),
                    None => return Ok(None),
                },
            };

            let mut value = original.clone();
            let result = modify(&mut value);
            let must_write = matches!(precondition, Precondition::IfAbsent) || value != original;
            if !must_write || self.save_json(key, &value, Some(&precondition)).await? {
                return Ok(Some(result));
            }
            debug!("Conditional write on {key} lost a race (attempt {attempt}), retrying");
        }
        warn!("Giving up on {key} after {CAS_MAX_ATTEMPTS} conflicting writes");
        Err(StorageError::Conflict(key.to_string()))
    }

    /// Delete object from R2
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

    /// List every key under `prefix`, following continuation tokens
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| StorageError::S3List(e.to_string()))?;

            keys.extend(
                output
                    .contents()
                    .iter()
                    .filter_map(|object| object.key().map(ToString::to_string)),
            );

            match output.next_continuation_token() {
                Some(token) if output.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }
        Ok(keys)
    }
}

fn is_precondition_failure<E>(err: &SdkError<E, HttpResponse>) -> bool {
    // 412 for a failed If-Match/If-None-Match, 409 when R2 sees a concurrent conditional write
    err.raw_response()
        .is_some_and(|raw| matches!(raw.status().as_u16(), 409 | 412))
}

#[async_trait]
impl RelayStore for R2Storage {
    async fn ensure_account(
        &self,
        user_id: UserId,
        username: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Account, StorageError> {
        let key = account_key(user_id);
        let seed = Account::new(user_id, username.clone(), now);
        self.modify_versioned(&key, Some(seed), |account: &mut Account| {
            if account.username.is_none() {
                account.username.clone_from(&username);
            }
            account.clone()
        })
        .await?
        .ok_or(StorageError::Conflict(key))
    }

    async fn get_account(&self, user_id: UserId) -> Result<Option<Account>, StorageError> {
        self.load_json(&account_key(user_id)).await
    }

    async fn consume_free_access(
        &self,
        user_id: UserId,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<u32>, StorageError> {
        let seed = Account::new(user_id, None, now);
        let consumed = self
            .modify_versioned(&account_key(user_id), Some(seed), |account: &mut Account| {
                if account.files_accessed >= limit {
                    return None;
                }
                account.files_accessed += 1;
                Some(account.files_accessed)
            })
            .await?;
        Ok(consumed.flatten())
    }

    async fn reset_files_accessed(&self, user_id: UserId) -> Result<bool, StorageError> {
        let reset = self
            .modify_versioned(&account_key(user_id), None, |account: &mut Account| {
                account.files_accessed = 0;
            })
            .await?;
        Ok(reset.is_some())
    }

    async fn set_premium(
        &self,
        user_id: UserId,
        is_premium: bool,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let seed = Account::new(user_id, None, now);
        self.modify_versioned(&account_key(user_id), Some(seed), |account: &mut Account| {
            account.is_premium = is_premium;
        })
        .await?;
        Ok(())
    }

    async fn list_user_ids(&self) -> Result<Vec<UserId>, StorageError> {
        let keys = self.list_keys(ACCOUNTS_PREFIX).await?;
        Ok(keys
            .iter()
            .filter_map(|key| user_id_from_account_key(key))
            .collect())
    }

    async fn insert_file(&self, record: FileRecord) -> Result<(), StorageError> {
        let key = file_key(&record.handle);
        if !self
            .save_json(&key, &record, Some(&Precondition::IfAbsent))
            .await?
        {
            return Err(StorageError::Conflict(key));
        }
        self.file_cache
            .insert(record.handle.clone(), Arc::new(record))
            .await;
        Ok(())
    }

    async fn get_file(&self, handle: &FileHandle) -> Result<Option<FileRecord>, StorageError> {
        if let Some(cached) = self.file_cache.get(handle).await {
            return Ok(Some(cached.as_ref().clone()));
        }
        let record: Option<FileRecord> = self.load_json(&file_key(handle)).await?;
        if let Some(record) = &record {
            self.file_cache
                .insert(handle.clone(), Arc::new(record.clone()))
                .await;
        }
        Ok(record)
    }

    async fn insert_token(&self, token: VerificationToken) -> Result<(), StorageError> {
        let key = token_key(token.user_id, &token.token);
        if self
            .save_json(&key, &token, Some(&Precondition::IfAbsent))
            .await?
        {
            Ok(())
        } else {
            Err(StorageError::Conflict("verification token".to_string()))
        }
    }

    async fn find_token(
        &self,
        user_id: UserId,
        token: &str,
    ) -> Result<Option<VerificationToken>, StorageError> {
        self.load_json(&token_key(user_id, token)).await
    }

    async fn redeem_token(
        &self,
        user_id: UserId,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<FileHandle>, StorageError> {
        let redeemed = self
            .modify_versioned(
                &token_key(user_id, token),
                None,
                |record: &mut VerificationToken| record.redeem_at(now),
            )
            .await?;
        Ok(redeemed.flatten())
    }

    async fn delete_expired_tokens(&self, now: DateTime<Utc>) -> Result<usize, StorageError> {
        let mut removed = 0;
        for key in self.list_keys(TOKENS_PREFIX).await? {
            match self.load_json::<VerificationToken>(&key).await {
                Ok(Some(token)) if token.is_expired_at(now) => {
                    self.delete_object(&key).await?;
                    removed += 1;
                }
                Ok(_) => {}
                Err(StorageError::Json(e)) => {
                    warn!("Skipping unreadable token object {key}: {e}");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(removed)
    }

    async fn delete_user_tokens(&self, user_id: UserId) -> Result<usize, StorageError> {
        let keys = self.list_keys(&user_tokens_prefix(user_id)).await?;
        for key in &keys {
            self.delete_object(key).await?;
        }
        Ok(keys.len())
    }

    async fn get_shortlink_settings(&self) -> Result<Option<ShortlinkSettings>, StorageError> {
        self.load_json(SHORTLINK_SETTINGS_KEY).await
    }

    async fn put_shortlink_settings(
        &self,
        settings: ShortlinkSettings,
    ) -> Result<(), StorageError> {
        self.save_json(SHORTLINK_SETTINGS_KEY, &settings, None)
            .await?;
        Ok(())
    }

    async fn check_connection(&self) -> Result<(), String> {
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
