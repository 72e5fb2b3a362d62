//! In-memory metadata store.
//!
//! Backs tests and single-node development runs.  All maps live behind
//! one `RwLock`, so every operation observes and produces a consistent
//! snapshot; the conditional operations hold the write lock across
//! check and mutation, which is what makes them atomic here.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::ops::Bound;
use std::pin::Pin;
use std::sync::RwLock;

use super::store::{
    BucketRecord, CommitOutcome, DeleteBucketOutcome, ListObjectsResult, ListPartsResult,
    ListUploadsResult, MetadataStore, ObjectRecord, PartRecord, UploadRecord, UploadState,
};

#[derive(Default)]
struct Inner {
    buckets: HashMap<String, BucketRecord>,
    /// Keyed by (bucket, key); ordered so listings come out sorted.
    objects: BTreeMap<(String, String), ObjectRecord>,
    uploads: HashMap<String, UploadRecord>,
    /// Part records per upload id, ordered by part number.
    parts: HashMap<String, BTreeMap<u32, PartRecord>>,
}

/// In-memory [`MetadataStore`] implementation.
#[derive(Default)]
pub struct MemoryMetadataStore {
    inner: RwLock<Inner>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataStore for MemoryMetadataStore {
    // -- Buckets --------------------------------------------------------------

    fn create_bucket(
        &self,
        record: BucketRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            if inner.buckets.contains_key(&record.name) {
                anyhow::bail!("bucket already exists: {}", record.name);
            }
            inner.buckets.insert(record.name.clone(), record);
            Ok(())
        })
    }

    fn get_bucket(
        &self,
        name: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<BucketRecord>>> + Send + '_>> {
        let name = name.to_string();
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            Ok(inner.buckets.get(&name).cloned())
        })
    }

    fn list_buckets(
        &self,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<BucketRecord>>> + Send + '_>> {
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            let mut buckets: Vec<BucketRecord> = inner.buckets.values().cloned().collect();
            buckets.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(buckets)
        })
    }

    fn delete_bucket_if_empty(
        &self,
        name: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<DeleteBucketOutcome>> + Send + '_>> {
        let name = name.to_string();
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            if !inner.buckets.contains_key(&name) {
                return Ok(DeleteBucketOutcome::NotFound);
            }
            let has_objects = inner.objects.keys().any(|(b, _)| *b == name);
            let has_live_uploads = inner
                .uploads
                .values()
                .any(|u| u.bucket == name && !u.state.is_terminal());
            if has_objects || has_live_uploads {
                return Ok(DeleteBucketOutcome::NotEmpty);
            }
            inner.buckets.remove(&name);
            Ok(DeleteBucketOutcome::Deleted)
        })
    }

    fn update_bucket_acl(
        &self,
        name: &str,
        acl: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let name = name.to_string();
        let acl = acl.to_string();
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            match inner.buckets.get_mut(&name) {
                Some(bucket) => {
                    bucket.acl = acl;
                    Ok(())
                }
                None => anyhow::bail!("no such bucket: {name}"),
            }
        })
    }

    // -- Objects --------------------------------------------------------------

    fn put_object(
        &self,
        record: ObjectRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            inner
                .objects
                .insert((record.bucket.clone(), record.key.clone()), record);
            Ok(())
        })
    }

    fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<ObjectRecord>>> + Send + '_>> {
        let k = (bucket.to_string(), key.to_string());
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            Ok(inner.objects.get(&k).cloned())
        })
    }

    fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
        max_keys: u32,
        continuation_token: Option<&str>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ListObjectsResult>> + Send + '_>> {
        let bucket = bucket.to_string();
        let prefix = prefix.to_string();
        let delimiter = delimiter.to_string();
        let token = continuation_token.map(|s| s.to_string());
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");

            let mut objects = Vec::new();
            let mut common_prefixes: Vec<String> = Vec::new();
            let mut is_truncated = false;
            let mut next_token = None;

            for ((b, key), record) in inner.objects.range((bucket.clone(), String::new())..) {
                if *b != bucket {
                    break;
                }
                if !key.starts_with(&prefix) {
                    continue;
                }
                // The continuation token is the last emitted entry.
                if let Some(ref t) = token {
                    if key.as_str() <= t.as_str() {
                        continue;
                    }
                }

                // Roll keys sharing a delimited prefix into one entry.
                let entry_name = if !delimiter.is_empty() {
                    key[prefix.len()..]
                        .find(&delimiter)
                        .map(|pos| key[..prefix.len() + pos + delimiter.len()].to_string())
                } else {
                    None
                };

                if let Some(cp) = entry_name {
                    if common_prefixes.last() == Some(&cp) {
                        continue;
                    }
                    if objects.len() + common_prefixes.len() >= max_keys as usize {
                        is_truncated = true;
                        next_token = Some(key.clone());
                        break;
                    }
                    common_prefixes.push(cp);
                } else {
                    if objects.len() + common_prefixes.len() >= max_keys as usize {
                        is_truncated = true;
                        next_token = Some(key.clone());
                        break;
                    }
                    objects.push(record.clone());
                }
            }

            // Report the last entry actually emitted as the resume point.
            if is_truncated {
                let last_object = objects.last().map(|o| o.key.clone());
                let last_prefix = common_prefixes.last().cloned();
                next_token = match (last_object, last_prefix) {
                    (Some(o), Some(p)) => Some(o.max(p)),
                    (Some(o), None) => Some(o),
                    (None, Some(p)) => Some(p),
                    (None, None) => next_token,
                };
            }

            Ok(ListObjectsResult {
                objects,
                common_prefixes,
                next_continuation_token: next_token,
                is_truncated,
            })
        })
    }

    fn delete_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let k = (bucket.to_string(), key.to_string());
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            Ok(inner.objects.remove(&k).is_some())
        })
    }

    // -- Multipart sessions ---------------------------------------------------

    fn create_upload(
        &self,
        record: UploadRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            inner.parts.insert(record.upload_id.clone(), BTreeMap::new());
            inner.uploads.insert(record.upload_id.clone(), record);
            Ok(())
        })
    }

    fn get_upload(
        &self,
        upload_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<UploadRecord>>> + Send + '_>> {
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            Ok(inner.uploads.get(&upload_id).cloned())
        })
    }

    fn put_part(
        &self,
        upload_id: &str,
        part: PartRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            inner
                .parts
                .entry(upload_id)
                .or_default()
                .insert(part.part_number, part);
            Ok(())
        })
    }

    fn list_parts(
        &self,
        upload_id: &str,
        max_parts: u32,
        part_number_marker: u32,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ListPartsResult>> + Send + '_>> {
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            let all = inner.parts.get(&upload_id);
            let mut parts = Vec::new();
            let mut is_truncated = false;
            let mut next_marker = None;
            if let Some(map) = all {
                // Excluded bound instead of marker + 1: a marker of
                // u32::MAX must yield an empty page, not overflow.
                let after_marker = (Bound::Excluded(part_number_marker), Bound::Unbounded);
                for part in map.range(after_marker).map(|(_, p)| p) {
                    if parts.len() >= max_parts as usize {
                        is_truncated = true;
                        next_marker = parts.last().map(|p: &PartRecord| p.part_number);
                        break;
                    }
                    parts.push(part.clone());
                }
            }
            Ok(ListPartsResult {
                parts,
                is_truncated,
                next_part_number_marker: next_marker,
            })
        })
    }

    fn parts_snapshot(
        &self,
        upload_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<PartRecord>>> + Send + '_>> {
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            Ok(inner
                .parts
                .get(&upload_id)
                .map(|map| map.values().cloned().collect())
                .unwrap_or_default())
        })
    }

    fn transition_upload(
        &self,
        upload_id: &str,
        from: UploadState,
        to: UploadState,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            match inner.uploads.get_mut(&upload_id) {
                Some(upload) if upload.state == from => {
                    upload.state = to;
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }

    fn commit_completed_upload(
        &self,
        upload_id: &str,
        final_object: ObjectRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<CommitOutcome>> + Send + '_>> {
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            match inner.uploads.get_mut(&upload_id) {
                Some(upload) if upload.state == UploadState::Completing => {
                    upload.state = UploadState::Completed;
                }
                _ => return Ok(CommitOutcome::Conflict),
            }
            inner
                .objects
                .insert((final_object.bucket.clone(), final_object.key.clone()), final_object);
            inner.parts.remove(&upload_id);
            Ok(CommitOutcome::Committed)
        })
    }

    fn list_uploads(
        &self,
        bucket: &str,
        prefix: &str,
        max_uploads: u32,
        key_marker: &str,
        upload_id_marker: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ListUploadsResult>> + Send + '_>> {
        let bucket = bucket.to_string();
        let prefix = prefix.to_string();
        let key_marker = key_marker.to_string();
        let upload_id_marker = upload_id_marker.to_string();
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            let mut matching: Vec<UploadRecord> = inner
                .uploads
                .values()
                .filter(|u| {
                    u.bucket == bucket && u.state == UploadState::Open && u.key.starts_with(&prefix)
                })
                .cloned()
                .collect();
            matching.sort_by(|a, b| {
                a.key
                    .cmp(&b.key)
                    .then_with(|| a.upload_id.cmp(&b.upload_id))
            });

            let mut uploads = Vec::new();
            let mut is_truncated = false;
            for upload in matching {
                if !key_marker.is_empty() {
                    let after_marker = upload.key.as_str() > key_marker.as_str()
                        || (upload.key == key_marker
                            && upload.upload_id.as_str() > upload_id_marker.as_str());
                    if !after_marker {
                        continue;
                    }
                }
                if uploads.len() >= max_uploads as usize {
                    is_truncated = true;
                    break;
                }
                uploads.push(upload);
            }

            let (next_key_marker, next_upload_id_marker) = if is_truncated {
                match uploads.last() {
                    Some(last) => (Some(last.key.clone()), Some(last.upload_id.clone())),
                    None => (None, None),
                }
            } else {
                (None, None)
            };

            Ok(ListUploadsResult {
                uploads,
                is_truncated,
                next_key_marker,
                next_upload_id_marker,
            })
        })
    }
}
