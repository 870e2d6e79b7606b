//! Append-only, line-delimited JSON log backing a [`VolatileStore`](crate::VolatileStore).
//!
//! Every line is one record:
//!
//! ```text
//! {"uuid":1,"user_url":{"user_id":"u1","original_url":"http://example.com"},"short_url":"0A1B2C3D4E5F6071"}
//! ```
//!
//! Soft-deleted records carry `"is_deleted":true` inside `user_url`.
//! Deletions are applied by rewriting the whole file from memory.

use linkstash_core::{Result, StorageError, UserUrl};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Serialize)]
struct LineRef<'a> {
    uuid: u64,
    user_url: &'a UserUrl,
    short_url: &'a str,
}

#[derive(Deserialize)]
struct Line {
    user_url: UserUrl,
    short_url: String,
}

#[derive(Debug)]
struct Writer {
    file: File,
    next_seq: u64,
    /// A previous append may have left a partial line behind.
    torn: bool,
    /// `file` may no longer be the file at `path`.
    stale: bool,
}

/// Persistence log for the volatile store.
///
/// The file handle is owned here and serialized behind a mutex, so at most
/// one append or rewrite runs at a time.
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    writer: Mutex<Writer>,
}

impl Journal {
    /// Opens (creating if needed) the log at `path` for appending.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let file = open_for_append(&path).await?;
        debug!(path = %path.display(), "journal opened");

        Ok(Self {
            path,
            writer: Mutex::new(Writer {
                file,
                next_seq: 1,
                torn: false,
                stale: false,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replays the log into a map keyed by short key.
    ///
    /// Malformed lines are skipped. When they form the tail of the file
    /// (a torn trailing write) they are cut off so later appends start on a
    /// clean line; malformed lines followed by valid ones stay on disk. A key
    /// seen twice keeps its first record.
    pub async fn load_all(&self) -> Result<HashMap<String, UserUrl>> {
        let mut writer = self.writer.lock().await;
        let content = fs::read(&self.path).await?;

        let mut records = HashMap::new();
        let mut lines_read = 0_u64;
        let mut line_no = 0_u64;
        let mut valid_len = 0_usize;
        let mut offset = 0_usize;

        for raw in content.split_inclusive(|b| *b == b'\n') {
            offset += raw.len();
            line_no += 1;

            if raw.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            match serde_json::from_slice::<Line>(raw) {
                Ok(line) => {
                    lines_read += 1;
                    valid_len = offset;
                    records.entry(line.short_url).or_insert(line.user_url);
                }
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        line = line_no,
                        error = %e,
                        "skipping malformed journal line"
                    );
                }
            }
        }

        if valid_len < content.len() {
            if !content[valid_len..].iter().all(u8::is_ascii_whitespace) {
                warn!(
                    path = %self.path.display(),
                    bytes = content.len() - valid_len,
                    "cutting malformed journal tail"
                );
            }
            writer.file.set_len(valid_len as u64).await?;
        }
        if valid_len > 0 && content[valid_len - 1] != b'\n' {
            writer.file.write_all(b"\n").await?;
            writer.file.flush().await?;
        }

        writer.next_seq = lines_read + 1;
        writer.torn = false;
        info!(path = %self.path.display(), records = records.len(), "journal replayed");

        Ok(records)
    }

    /// Appends one record and returns the sequence number it was written with.
    pub async fn append(&self, short_key: &str, record: &UserUrl) -> Result<u64> {
        let mut writer = self.writer.lock().await;
        if writer.stale {
            writer.file = open_for_append(&self.path).await?;
            writer.stale = false;
        }
        let seq = writer.next_seq;

        let mut line = Vec::new();
        if writer.torn {
            line.push(b'\n');
        }
        line.extend(encode_line(seq, short_key, record)?);
        line.push(b'\n');

        writer.torn = true;
        writer.file.write_all(&line).await?;
        writer.file.flush().await?;
        writer.torn = false;

        writer.next_seq += 1;
        Ok(seq)
    }

    /// Replaces the file content with `records`, numbered from 1.
    ///
    /// The new content is written to a sibling file and renamed over the log,
    /// so a crash mid-rewrite leaves the previous content intact. The handle
    /// used to write the sibling becomes the append handle.
    pub async fn rewrite(&self, records: &[(String, UserUrl)]) -> Result<()> {
        let mut writer = self.writer.lock().await;

        let mut buf = Vec::new();
        for (index, (short_key, record)) in records.iter().enumerate() {
            buf.extend(encode_line(index as u64 + 1, short_key, record)?);
            buf.push(b'\n');
        }

        let tmp = self.path.with_extension("rewrite");
        match fs::remove_file(&tmp).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let mut file = open_for_append(&tmp).await?;
        file.write_all(&buf).await?;
        file.sync_all().await?;

        // from here on the rename may land even if this future is dropped
        writer.stale = true;
        fs::rename(&tmp, &self.path).await?;

        writer.file = file;
        writer.stale = false;
        writer.torn = false;
        writer.next_seq = records.len() as u64 + 1;
        debug!(path = %self.path.display(), records = records.len(), "journal rewritten");

        Ok(())
    }
}

async fn open_for_append(path: &Path) -> Result<File> {
    Ok(OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?)
}

fn encode_line(uuid: u64, short_url: &str, user_url: &UserUrl) -> Result<Vec<u8>> {
    serde_json::to_vec(&LineRef {
        uuid,
        user_url,
        short_url,
    })
    .map_err(|e| StorageError::InvalidData(format!("failed to encode journal line: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(user: &str, url: &str) -> UserUrl {
        UserUrl::new(user, url)
    }

    async fn journal_in(dir: &TempDir) -> Journal {
        Journal::open(dir.path().join("short-url-db.json")).await.unwrap()
    }

    #[tokio::test]
    async fn append_writes_documented_line_format() {
        let dir = TempDir::new().unwrap();
        let journal = journal_in(&dir).await;

        let seq = journal
            .append("0A1B2C3D4E5F6071", &record("u1", "http://example.com"))
            .await
            .unwrap();
        assert_eq!(seq, 1);

        let content = std::fs::read_to_string(journal.path()).unwrap();
        assert_eq!(
            content,
            "{\"uuid\":1,\"user_url\":{\"user_id\":\"u1\",\"original_url\":\"http://example.com\"},\"short_url\":\"0A1B2C3D4E5F6071\"}\n"
        );
    }

    #[tokio::test]
    async fn load_all_replays_appended_records() {
        let dir = TempDir::new().unwrap();
        {
            let journal = journal_in(&dir).await;
            journal.append("AAA", &record("u1", "http://a")).await.unwrap();
            journal.append("BBB", &record("u2", "http://b")).await.unwrap();
        }

        let journal = journal_in(&dir).await;
        let records = journal.load_all().await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records["AAA"], record("u1", "http://a"));
        assert_eq!(records["BBB"], record("u2", "http://b"));
        assert_eq!(journal.append("CCC", &record("u1", "http://c")).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::open(dir.path().join("nested").join("db.json"))
            .await
            .unwrap();

        assert!(journal.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn truncated_tail_is_cut_off() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short-url-db.json");
        std::fs::write(
            &path,
            "{\"uuid\":1,\"user_url\":{\"user_id\":\"u1\",\"original_url\":\"http://a\"},\"short_url\":\"AAA\"}\n{\"uuid\":2,\"user_url\":{\"user_",
        )
        .unwrap();

        let journal = Journal::open(&path).await.unwrap();
        let records = journal.load_all().await.unwrap();
        assert_eq!(records.len(), 1);

        journal.append("BBB", &record("u2", "http://b")).await.unwrap();

        let reopened = Journal::open(&path).await.unwrap();
        let records = reopened.load_all().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records["BBB"].original_url, "http://b");
    }

    #[tokio::test]
    async fn malformed_line_before_valid_ones_is_skipped_and_kept() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short-url-db.json");
        let content = concat!(
            "{\"uuid\":1,\"user_url\":{\"user_id\":\"u1\",\"original_url\":\"http://a\"},\"short_url\":\"AAA\"}\n",
            "{\"uuid\":2,\"user_url\":{\"user_\n",
            "{\"uuid\":3,\"user_url\":{\"user_id\":\"u1\",\"original_url\":\"http://c\"},\"short_url\":\"CCC\"}\n",
            "{\"uuid\":4,\"user_url\":{\"user_id\":\"u2\",\"original_url\":\"http://d\"},\"short_url\":\"DDD\"}\n",
        );
        std::fs::write(&path, content).unwrap();

        let journal = Journal::open(&path).await.unwrap();
        let records = journal.load_all().await.unwrap();

        assert_eq!(records.len(), 3);
        assert!(records.contains_key("AAA"));
        assert_eq!(records["CCC"].original_url, "http://c");
        assert_eq!(records["DDD"].user_id, "u2");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), content);
        assert_eq!(journal.append("EEE", &record("u1", "http://e")).await.unwrap(), 4);

        let records = Journal::open(&path).await.unwrap().load_all().await.unwrap();
        assert_eq!(records.len(), 4);
    }

    #[tokio::test]
    async fn append_follows_file_replaced_by_unfinished_rewrite() {
        let dir = TempDir::new().unwrap();
        let journal = journal_in(&dir).await;
        journal.append("AAA", &record("u1", "http://a")).await.unwrap();

        let replacement = dir.path().join("short-url-db.rewrite");
        std::fs::write(
            &replacement,
            "{\"uuid\":1,\"user_url\":{\"user_id\":\"u1\",\"original_url\":\"http://a\",\"is_deleted\":true},\"short_url\":\"AAA\"}\n",
        )
        .unwrap();
        std::fs::rename(&replacement, journal.path()).unwrap();
        journal.writer.lock().await.stale = true;

        journal.append("BBB", &record("u1", "http://b")).await.unwrap();

        let records = journal_in(&dir).await.load_all().await.unwrap();
        assert!(records["AAA"].is_deleted);
        assert_eq!(records["BBB"].original_url, "http://b");
    }

    #[tokio::test]
    async fn append_after_torn_write_starts_a_new_line() {
        let dir = TempDir::new().unwrap();
        let journal = journal_in(&dir).await;
        journal.append("AAA", &record("u1", "http://a")).await.unwrap();

        std::fs::OpenOptions::new()
            .append(true)
            .open(journal.path())
            .and_then(|mut file| std::io::Write::write_all(&mut file, b"{\"uuid\":2,\"us"))
            .unwrap();
        journal.writer.lock().await.torn = true;

        journal.append("CCC", &record("u1", "http://c")).await.unwrap();

        let records = journal_in(&dir).await.load_all().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records["CCC"].original_url, "http://c");
    }

    #[tokio::test]
    async fn rewrite_failure_keeps_previous_content() {
        let dir = TempDir::new().unwrap();
        let journal = journal_in(&dir).await;
        journal.append("AAA", &record("u1", "http://a")).await.unwrap();
        std::fs::create_dir(dir.path().join("short-url-db.rewrite")).unwrap();

        let err = journal.rewrite(&[]).await.unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));

        journal.append("BBB", &record("u1", "http://b")).await.unwrap();
        let records = journal_in(&dir).await.load_all().await.unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn duplicate_key_keeps_first_record() {
        let dir = TempDir::new().unwrap();
        let journal = journal_in(&dir).await;
        journal.append("AAA", &record("u1", "http://first")).await.unwrap();
        journal.append("AAA", &record("u1", "http://second")).await.unwrap();

        let records = journal.load_all().await.unwrap();
        assert_eq!(records["AAA"].original_url, "http://first");
    }

    #[tokio::test]
    async fn rewrite_replaces_content_and_keeps_deletions() {
        let dir = TempDir::new().unwrap();
        let journal = journal_in(&dir).await;
        journal.append("AAA", &record("u1", "http://a")).await.unwrap();
        journal.append("BBB", &record("u1", "http://b")).await.unwrap();

        let mut deleted = record("u1", "http://a");
        deleted.is_deleted = true;
        journal
            .rewrite(&[
                ("AAA".to_string(), deleted),
                ("BBB".to_string(), record("u1", "http://b")),
            ])
            .await
            .unwrap();
        assert_eq!(journal.append("CCC", &record("u2", "http://c")).await.unwrap(), 3);

        let content = std::fs::read_to_string(journal.path()).unwrap();
        assert_eq!(content.lines().count(), 3);
        assert!(content.lines().next().unwrap().contains("\"is_deleted\":true"));

        let records = journal_in(&dir).await.load_all().await.unwrap();
        assert!(records["AAA"].is_deleted);
        assert!(!records["BBB"].is_deleted);
        assert_eq!(records["CCC"].user_id, "u2");
    }
}
