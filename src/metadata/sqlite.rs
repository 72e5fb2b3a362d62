//! SQLite-backed metadata store.
//!
//! Uses `rusqlite` with the `bundled` feature so no system SQLite
//! library is required.  All async trait methods are thin wrappers
//! around synchronous rusqlite calls executed under a `Mutex`.
//!
//! The conditional operations map onto SQLite primitives: the session
//! CAS is a single guarded UPDATE, and the completion commit and the
//! empty-bucket delete run inside one transaction each.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use super::store::{
    BucketRecord, CommitOutcome, DeleteBucketOutcome, ListObjectsResult, ListPartsResult,
    ListUploadsResult, MetadataStore, ObjectRecord, PartRecord, UploadRecord, UploadState,
};

/// Current schema version. Bumped when migrations are added.
const SCHEMA_VERSION: i64 = 1;

/// Metadata store backed by a single SQLite database file.
pub struct SqliteMetadataStore {
    /// The database connection, guarded by a mutex for Send + Sync.
    conn: Mutex<Connection>,
}

impl SqliteMetadataStore {
    /// Open (or create) the database at `path` and initialize the schema.
    ///
    /// Passing `":memory:"` creates an in-memory database (useful for tests).
    pub fn new(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.apply_pragmas()?;
        store.init_db()?;
        Ok(store)
    }

    /// Apply recommended SQLite pragmas for performance and safety.
    fn apply_pragmas(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
        Ok(())
    }

    /// Create the required tables and indexes if they do not already exist.
    /// Idempotent, safe to call on every startup.
    fn init_db(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            -- Schema version tracking
            CREATE TABLE IF NOT EXISTS schema_version (
                version    INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );

            -- Buckets
            CREATE TABLE IF NOT EXISTS buckets (
                name           TEXT PRIMARY KEY,
                owner_id       TEXT NOT NULL,
                owner_display  TEXT NOT NULL DEFAULT '',
                acl            TEXT NOT NULL DEFAULT '{}',
                pool           TEXT NOT NULL,
                created_at     TEXT NOT NULL
            );

            -- Objects
            CREATE TABLE IF NOT EXISTS objects (
                bucket         TEXT NOT NULL,
                key            TEXT NOT NULL,
                size           INTEGER NOT NULL,
                etag           TEXT NOT NULL,
                content_type   TEXT NOT NULL DEFAULT 'application/octet-stream',
                object_id      TEXT NOT NULL,
                last_modified  TEXT NOT NULL,

                PRIMARY KEY (bucket, key),
                FOREIGN KEY (bucket) REFERENCES buckets(name) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_objects_bucket_key
                ON objects(bucket, key);

            -- Multipart upload sessions
            CREATE TABLE IF NOT EXISTS uploads (
                upload_id      TEXT PRIMARY KEY,
                bucket         TEXT NOT NULL,
                key            TEXT NOT NULL,
                content_type   TEXT NOT NULL DEFAULT 'application/octet-stream',
                acl            TEXT NOT NULL DEFAULT '{}',
                owner_id       TEXT NOT NULL,
                owner_display  TEXT NOT NULL DEFAULT '',
                state          TEXT NOT NULL DEFAULT 'open',
                initiated_at   TEXT NOT NULL,

                FOREIGN KEY (bucket) REFERENCES buckets(name) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_uploads_bucket_key
                ON uploads(bucket, key);

            -- Uploaded parts
            CREATE TABLE IF NOT EXISTS parts (
                upload_id      TEXT NOT NULL,
                part_number    INTEGER NOT NULL,
                size           INTEGER NOT NULL,
                etag           TEXT NOT NULL,
                object_id      TEXT NOT NULL,
                last_modified  TEXT NOT NULL,

                PRIMARY KEY (upload_id, part_number),
                FOREIGN KEY (upload_id) REFERENCES uploads(upload_id) ON DELETE CASCADE
            );
            ",
        )?;

        // Record schema version if not already present.
        let existing: Option<i64> = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .optional()?
            .flatten();

        if existing.is_none() || existing < Some(SCHEMA_VERSION) {
            let now = crate::handlers::now_iso8601();
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                params![SCHEMA_VERSION, now],
            )?;
        }

        Ok(())
    }
}

fn map_bucket_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<BucketRecord> {
    Ok(BucketRecord {
        name: row.get(0)?,
        owner_id: row.get(1)?,
        owner_display: row.get(2)?,
        acl: row.get(3)?,
        pool: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn map_object_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ObjectRecord> {
    let size: i64 = row.get(2)?;
    Ok(ObjectRecord {
        bucket: row.get(0)?,
        key: row.get(1)?,
        size: size as u64,
        etag: row.get(3)?,
        content_type: row.get(4)?,
        object_id: row.get(5)?,
        last_modified: row.get(6)?,
    })
}

fn map_part_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PartRecord> {
    let size: i64 = row.get(1)?;
    Ok(PartRecord {
        part_number: row.get(0)?,
        size: size as u64,
        etag: row.get(2)?,
        object_id: row.get(3)?,
        last_modified: row.get(4)?,
    })
}

/// Intermediate row shape; the state column still needs parsing.
fn map_upload_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(UploadRecord, String)> {
    let state: String = row.get(8)?;
    Ok((
        UploadRecord {
            upload_id: row.get(0)?,
            bucket: row.get(1)?,
            key: row.get(2)?,
            content_type: row.get(3)?,
            acl: row.get(4)?,
            owner_id: row.get(5)?,
            owner_display: row.get(6)?,
            initiated_at: row.get(7)?,
            state: UploadState::Open,
        },
        state,
    ))
}

fn finish_upload_row((mut record, state): (UploadRecord, String)) -> anyhow::Result<UploadRecord> {
    record.state = UploadState::parse(&state)
        .ok_or_else(|| anyhow::anyhow!("unknown upload state in database: {state}"))?;
    Ok(record)
}

const UPLOAD_COLUMNS: &str =
    "upload_id, bucket, key, content_type, acl, owner_id, owner_display, initiated_at, state";

// -- MetadataStore implementation ---------------------------------------------

impl MetadataStore for SqliteMetadataStore {
    // -- Buckets --------------------------------------------------------------

    fn create_bucket(
        &self,
        record: BucketRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            conn.execute(
                "INSERT INTO buckets (name, owner_id, owner_display, acl, pool, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.name,
                    record.owner_id,
                    record.owner_display,
                    record.acl,
                    record.pool,
                    record.created_at,
                ],
            )?;
            Ok(())
        })
    }

    fn get_bucket(
        &self,
        name: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<BucketRecord>>> + Send + '_>> {
        let name = name.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let result = conn
                .query_row(
                    "SELECT name, owner_id, owner_display, acl, pool, created_at
                     FROM buckets WHERE name = ?1",
                    params![name],
                    map_bucket_row,
                )
                .optional()?;
            Ok(result)
        })
    }

    fn list_buckets(
        &self,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<BucketRecord>>> + Send + '_>> {
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let mut stmt = conn.prepare(
                "SELECT name, owner_id, owner_display, acl, pool, created_at
                 FROM buckets ORDER BY name",
            )?;
            let rows = stmt.query_map([], map_bucket_row)?;
            let mut buckets = Vec::new();
            for row in rows {
                buckets.push(row?);
            }
            Ok(buckets)
        })
    }

    fn delete_bucket_if_empty(
        &self,
        name: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<DeleteBucketOutcome>> + Send + '_>> {
        let name = name.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let tx = conn.unchecked_transaction()?;

            let exists: i64 = tx.query_row(
                "SELECT COUNT(*) FROM buckets WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )?;
            if exists == 0 {
                return Ok(DeleteBucketOutcome::NotFound);
            }

            let objects: i64 = tx.query_row(
                "SELECT COUNT(*) FROM objects WHERE bucket = ?1",
                params![name],
                |row| row.get(0),
            )?;
            let live_uploads: i64 = tx.query_row(
                "SELECT COUNT(*) FROM uploads
                 WHERE bucket = ?1 AND state IN ('open', 'completing')",
                params![name],
                |row| row.get(0),
            )?;
            if objects > 0 || live_uploads > 0 {
                return Ok(DeleteBucketOutcome::NotEmpty);
            }

            tx.execute("DELETE FROM buckets WHERE name = ?1", params![name])?;
            tx.commit()?;
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
            let conn = self.conn.lock().expect("mutex poisoned");
            let updated = conn.execute(
                "UPDATE buckets SET acl = ?1 WHERE name = ?2",
                params![acl, name],
            )?;
            if updated == 0 {
                anyhow::bail!("no such bucket: {name}");
            }
            Ok(())
        })
    }

    // -- Objects --------------------------------------------------------------

    fn put_object(
        &self,
        record: ObjectRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            conn.execute(
                "INSERT OR REPLACE INTO objects
                    (bucket, key, size, etag, content_type, object_id, last_modified)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.bucket,
                    record.key,
                    record.size as i64,
                    record.etag,
                    record.content_type,
                    record.object_id,
                    record.last_modified,
                ],
            )?;
            Ok(())
        })
    }

    fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<ObjectRecord>>> + Send + '_>> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let result = conn
                .query_row(
                    "SELECT bucket, key, size, etag, content_type, object_id, last_modified
                     FROM objects WHERE bucket = ?1 AND key = ?2",
                    params![bucket, key],
                    map_object_row,
                )
                .optional()?;
            Ok(result)
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
        let continuation_token = continuation_token.map(|s| s.to_string());
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");

            let start_key = continuation_token.unwrap_or_default();
            let like_pattern = format!("{prefix}%");
            // One extra row tells us whether the page is truncated.
            let fetch_limit = max_keys as i64 + 1;

            let mut stmt = conn.prepare(
                "SELECT bucket, key, size, etag, content_type, object_id, last_modified
                 FROM objects
                 WHERE bucket = ?1 AND key > ?2 AND key LIKE ?3
                 ORDER BY key
                 LIMIT ?4",
            )?;
            let rows = stmt.query_map(
                params![bucket, start_key, like_pattern, fetch_limit],
                map_object_row,
            )?;
            let mut all_objects: Vec<ObjectRecord> = Vec::new();
            for row in rows {
                all_objects.push(row?);
            }

            if delimiter.is_empty() {
                let is_truncated = all_objects.len() > max_keys as usize;
                let objects: Vec<ObjectRecord> =
                    all_objects.into_iter().take(max_keys as usize).collect();
                let next_token = if is_truncated {
                    objects.last().map(|o| o.key.clone())
                } else {
                    None
                };
                return Ok(ListObjectsResult {
                    objects,
                    common_prefixes: Vec::new(),
                    next_continuation_token: next_token,
                    is_truncated,
                });
            }

            // Delimiter grouping happens at the application level.
            let fetched = all_objects.len();
            let mut objects = Vec::new();
            let mut common_prefixes = std::collections::BTreeSet::new();
            let mut count = 0u32;
            let mut consumed = 0usize;

            for obj in all_objects {
                if count >= max_keys {
                    break;
                }
                consumed += 1;
                let after_prefix = &obj.key[prefix.len()..];
                if let Some(pos) = after_prefix.find(&delimiter) {
                    let cp = format!("{}{}{}", prefix, &after_prefix[..pos], delimiter);
                    if common_prefixes.insert(cp) {
                        count += 1;
                    }
                } else {
                    objects.push(obj);
                    count += 1;
                }
            }

            // Truncated when grouped keys remain beyond what was consumed.
            let is_truncated = count >= max_keys && consumed < fetched;
            let next_token = if is_truncated {
                let last_object = objects.last().map(|o| o.key.clone());
                let last_prefix = common_prefixes.iter().last().cloned();
                match (last_object, last_prefix) {
                    (Some(o), Some(p)) => Some(o.max(p)),
                    (Some(o), None) => Some(o),
                    (None, p) => p,
                }
            } else {
                None
            };

            Ok(ListObjectsResult {
                objects,
                common_prefixes: common_prefixes.into_iter().collect(),
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
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let deleted = conn.execute(
                "DELETE FROM objects WHERE bucket = ?1 AND key = ?2",
                params![bucket, key],
            )?;
            Ok(deleted > 0)
        })
    }

    // -- Multipart sessions ---------------------------------------------------

    fn create_upload(
        &self,
        record: UploadRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            conn.execute(
                "INSERT INTO uploads
                    (upload_id, bucket, key, content_type, acl,
                     owner_id, owner_display, initiated_at, state)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.upload_id,
                    record.bucket,
                    record.key,
                    record.content_type,
                    record.acl,
                    record.owner_id,
                    record.owner_display,
                    record.initiated_at,
                    record.state.as_str(),
                ],
            )?;
            Ok(())
        })
    }

    fn get_upload(
        &self,
        upload_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<UploadRecord>>> + Send + '_>> {
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let row = conn
                .query_row(
                    &format!("SELECT {UPLOAD_COLUMNS} FROM uploads WHERE upload_id = ?1"),
                    params![upload_id],
                    map_upload_row,
                )
                .optional()?;
            row.map(finish_upload_row).transpose()
        })
    }

    fn put_part(
        &self,
        upload_id: &str,
        part: PartRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            conn.execute(
                "INSERT OR REPLACE INTO parts
                    (upload_id, part_number, size, etag, object_id, last_modified)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    upload_id,
                    part.part_number,
                    part.size as i64,
                    part.etag,
                    part.object_id,
                    part.last_modified,
                ],
            )?;
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
            let conn = self.conn.lock().expect("mutex poisoned");
            let fetch_limit = max_parts as i64 + 1;
            let mut stmt = conn.prepare(
                "SELECT part_number, size, etag, object_id, last_modified
                 FROM parts
                 WHERE upload_id = ?1 AND part_number > ?2
                 ORDER BY part_number
                 LIMIT ?3",
            )?;
            let rows = stmt.query_map(
                params![upload_id, part_number_marker, fetch_limit],
                map_part_row,
            )?;
            let mut parts = Vec::new();
            for row in rows {
                parts.push(row?);
            }
            let is_truncated = parts.len() > max_parts as usize;
            if is_truncated {
                parts.truncate(max_parts as usize);
            }
            let next_marker = if is_truncated {
                parts.last().map(|p| p.part_number)
            } else {
                None
            };
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
            let conn = self.conn.lock().expect("mutex poisoned");
            let mut stmt = conn.prepare(
                "SELECT part_number, size, etag, object_id, last_modified
                 FROM parts
                 WHERE upload_id = ?1
                 ORDER BY part_number",
            )?;
            let rows = stmt.query_map(params![upload_id], map_part_row)?;
            let mut parts = Vec::new();
            for row in rows {
                parts.push(row?);
            }
            Ok(parts)
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
            let conn = self.conn.lock().expect("mutex poisoned");
            // A single guarded UPDATE is the CAS: zero rows means the
            // session moved on (or never existed).
            let updated = conn.execute(
                "UPDATE uploads SET state = ?1 WHERE upload_id = ?2 AND state = ?3",
                params![to.as_str(), upload_id, from.as_str()],
            )?;
            Ok(updated > 0)
        })
    }

    fn commit_completed_upload(
        &self,
        upload_id: &str,
        final_object: ObjectRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<CommitOutcome>> + Send + '_>> {
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let tx = conn.unchecked_transaction()?;

            let updated = tx.execute(
                "UPDATE uploads SET state = 'completed'
                 WHERE upload_id = ?1 AND state = 'completing'",
                params![upload_id],
            )?;
            if updated == 0 {
                return Ok(CommitOutcome::Conflict);
            }

            tx.execute(
                "INSERT OR REPLACE INTO objects
                    (bucket, key, size, etag, content_type, object_id, last_modified)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    final_object.bucket,
                    final_object.key,
                    final_object.size as i64,
                    final_object.etag,
                    final_object.content_type,
                    final_object.object_id,
                    final_object.last_modified,
                ],
            )?;
            tx.execute("DELETE FROM parts WHERE upload_id = ?1", params![upload_id])?;

            tx.commit()?;
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
            let conn = self.conn.lock().expect("mutex poisoned");
            let like_pattern = format!("{prefix}%");
            let fetch_limit = max_uploads as i64 + 1;

            // Empty markers degrade to `key > ''`, which every real key
            // satisfies, so one query covers all marker combinations.
            let mut stmt = conn.prepare(&format!(
                "SELECT {UPLOAD_COLUMNS} FROM uploads
                 WHERE bucket = ?1 AND state = 'open' AND key LIKE ?2
                   AND (key > ?3 OR (key = ?3 AND upload_id > ?4))
                 ORDER BY key, upload_id
                 LIMIT ?5"
            ))?;
            let rows = stmt.query_map(
                params![bucket, like_pattern, key_marker, upload_id_marker, fetch_limit],
                map_upload_row,
            )?;
            let mut uploads = Vec::new();
            for row in rows {
                uploads.push(finish_upload_row(row?)?);
            }

            let is_truncated = uploads.len() > max_uploads as usize;
            if is_truncated {
                uploads.truncate(max_uploads as usize);
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

// -- Tests --------------------------------------------------------------------
