use std::collections::BTreeMap;
use std::sync::Mutex;

use delta_sync_core::dispatch::ArtifactStore;
use delta_sync_core::listing::{ListedObject, ObjectPage, ObjectStore};

/// In-memory multi-bucket store that pages its listings like S3 does.
pub struct MemoryStore {
    objects: Mutex<BTreeMap<(String, String), u64>>,
    page_size: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_page_size(2)
    }
}

impl MemoryStore {
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            page_size: page_size.max(1),
        }
    }

    pub fn put(&self, bucket: &str, key: &str, size: u64) {
        self.objects
            .lock()
            .expect("poisoned mutex")
            .insert((bucket.to_string(), key.to_string()), size);
    }

    pub fn keys(&self, bucket: &str, prefix: &str) -> Vec<String> {
        self.objects
            .lock()
            .expect("poisoned mutex")
            .keys()
            .filter(|(name, key)| name == bucket && key.starts_with(prefix))
            .map(|(_, key)| key.clone())
            .collect()
    }
}

impl ObjectStore for MemoryStore {
    fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<&str>,
    ) -> Result<ObjectPage, String> {
        let start = match continuation_token {
            Some(token) => token.parse::<usize>().map_err(|error| error.to_string())?,
            None => 0,
        };
        let matching: Vec<ListedObject> = self
            .objects
            .lock()
            .expect("poisoned mutex")
            .iter()
            .filter(|((name, key), _)| name == bucket && key.starts_with(prefix))
            .map(|((_, key), size)| ListedObject {
                key: key.clone(),
                size: *size,
                last_modified: None,
            })
            .collect();
        let end = (start + self.page_size).min(matching.len());
        let next_token = (end < matching.len()).then(|| end.to_string());
        Ok(ObjectPage {
            objects: matching[start.min(end)..end].to_vec(),
            next_token,
        })
    }

    fn head(&self, bucket: &str, key: &str) -> Result<bool, String> {
        Ok(self
            .objects
            .lock()
            .expect("poisoned mutex")
            .contains_key(&(bucket.to_string(), key.to_string())))
    }

    fn copy(&self, bucket: &str, source_key: &str, target_key: &str) -> Result<(), String> {
        let mut objects = self.objects.lock().expect("poisoned mutex");
        let size = *objects
            .get(&(bucket.to_string(), source_key.to_string()))
            .ok_or_else(|| format!("no such key {source_key}"))?;
        objects.insert((bucket.to_string(), target_key.to_string()), size);
        Ok(())
    }

    fn delete(&self, bucket: &str, key: &str) -> Result<(), String> {
        self.objects
            .lock()
            .expect("poisoned mutex")
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryArtifacts {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryArtifacts {
    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .expect("poisoned mutex")
            .keys()
            .cloned()
            .collect()
    }
}

impl ArtifactStore for MemoryArtifacts {
    fn write_object(&self, key: &str, body: &[u8]) -> Result<(), String> {
        self.objects
            .lock()
            .expect("poisoned mutex")
            .insert(key.to_string(), body.to_vec());
        Ok(())
    }

    fn read_object(&self, key: &str) -> Result<Vec<u8>, String> {
        self.objects
            .lock()
            .expect("poisoned mutex")
            .get(key)
            .cloned()
            .ok_or_else(|| format!("missing {key}"))
    }
}
