use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncStage};

/// A non-empty object eligible for processing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub key: String,
    pub size: u64,
}

impl ObjectRecord {
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
        }
    }
}

/// Raw listing entry as returned by the store, before eligibility filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedObject {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectPage {
    pub objects: Vec<ListedObject>,
    pub next_token: Option<String>,
}

/// Key-value object store collaborator.
pub trait ObjectStore {
    fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<&str>,
    ) -> Result<ObjectPage, String>;

    fn head(&self, bucket: &str, key: &str) -> Result<bool, String>;

    fn copy(&self, bucket: &str, source_key: &str, target_key: &str) -> Result<(), String>;

    fn delete(&self, bucket: &str, key: &str) -> Result<(), String>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Drop entries last modified before this instant. Entries without a
    /// timestamp are kept.
    pub modified_since: Option<DateTime<Utc>>,
}

/// Pages through an [`ObjectStore`] prefix and materializes the full listing.
pub struct ObjectStoreLister<'a> {
    store: &'a dyn ObjectStore,
    options: ListOptions,
}

impl<'a> ObjectStoreLister<'a> {
    pub fn new(store: &'a dyn ObjectStore) -> Self {
        Self {
            store,
            options: ListOptions::default(),
        }
    }

    pub fn with_options(store: &'a dyn ObjectStore, options: ListOptions) -> Self {
        Self { store, options }
    }

    /// Eligible input objects: zero-size placeholders and entries older than
    /// `modified_since` are dropped, store order is preserved.
    pub fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectRecord>, SyncError> {
        let mut records = Vec::new();
        self.for_each_page(bucket, prefix, |page| {
            records.extend(
                page.into_iter()
                    .filter(|object| object.size > 0)
                    .filter(|object| self.is_recent_enough(object))
                    .map(|object| ObjectRecord::new(object.key, object.size)),
            );
        })?;

        tracing::debug!(
            component = "lister",
            event = "listed_inputs",
            bucket,
            prefix,
            count = records.len()
        );
        Ok(records)
    }

    /// Every key under the prefix, regardless of size. Output and error
    /// markers may legitimately be empty objects.
    pub fn list_markers(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, SyncError> {
        let mut keys = Vec::new();
        self.for_each_page(bucket, prefix, |page| {
            keys.extend(page.into_iter().map(|object| object.key));
        })?;

        tracing::debug!(
            component = "lister",
            event = "listed_markers",
            bucket,
            prefix,
            count = keys.len()
        );
        Ok(keys)
    }

    fn for_each_page(
        &self,
        bucket: &str,
        prefix: &str,
        mut on_page: impl FnMut(Vec<ListedObject>),
    ) -> Result<(), SyncError> {
        let mut token: Option<String> = None;
        loop {
            let page = self
                .store
                .list_page(bucket, prefix, token.as_deref())
                .map_err(|message| SyncError::StoreUnavailable {
                    stage: SyncStage::Listing,
                    message: format!("{bucket}/{prefix}: {message}"),
                })?;
            on_page(page.objects);

            match page.next_token {
                Some(next) if Some(&next) != token.as_ref() => token = Some(next),
                Some(_) => {
                    return Err(SyncError::StoreUnavailable {
                        stage: SyncStage::Listing,
                        message: "store repeated its continuation token".to_string(),
                    });
                }
                None => return Ok(()),
            }
        }
    }

    fn is_recent_enough(&self, object: &ListedObject) -> bool {
        match (self.options.modified_since, object.last_modified) {
            (Some(since), Some(modified)) => modified >= since,
            _ => true,
        }
    }
}
