//! A filesystem-backed [`WorkTopic`] (§6, §11): pending messages are
//! one file per message in a `pending/` directory; claiming one is an
//! atomic rename into `in_flight/`, which doubles as the mutual
//! exclusion between competing workers racing the same directory
//! listing — only one rename of a given source path can succeed.

use crate::{BatchMessage, DeliveryToken, WorkTopic};
use evochora_error::StorageError;
use evochora_types::BatchInfo;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A directory-backed work topic: `root/pending/*.msg` are ready
/// messages, `root/in_flight/<claim_deadline_nanos>_<name>` are claimed
/// ones. Standing in for a real broker in single-box deployments or
/// wherever a dependency on an external queue isn't wanted.
pub struct FileWorkTopic {
    root: PathBuf,
    claim_timeout: Duration,
    next_seq: AtomicU64,
}

impl FileWorkTopic {
    pub fn open(root: impl Into<PathBuf>, claim_timeout: Duration) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(root.join("pending")).map_err(StorageError::new)?;
        fs::create_dir_all(root.join("in_flight")).map_err(StorageError::new)?;
        Ok(Self {
            root,
            claim_timeout,
            next_seq: AtomicU64::new(0),
        })
    }

    fn pending_dir(&self) -> PathBuf {
        self.root.join("pending")
    }

    fn in_flight_dir(&self) -> PathBuf {
        self.root.join("in_flight")
    }

    /// Publishes a batch for delivery. Writes to a temporary name first
    /// so a half-written file is never visible under `pending/`.
    pub fn publish(&self, info: &BatchInfo) -> Result<(), StorageError> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let name = format!("{seq:020}_{}.msg", std::process::id());
        let bytes = bincode::serialize(info).map_err(StorageError::new)?;

        let tmp = self.pending_dir().join(format!(".{name}.tmp"));
        fs::write(&tmp, &bytes).map_err(StorageError::new)?;
        fs::rename(&tmp, self.pending_dir().join(&name)).map_err(StorageError::new)?;
        Ok(())
    }

    /// Moves any in-flight message whose claim has expired back to
    /// `pending/`, standing in for a broker's visibility timeout.
    fn requeue_expired(&self) -> Result<(), StorageError> {
        let now_nanos = now_nanos();
        for entry in read_dir_files(&self.in_flight_dir())? {
            let Some((deadline, original)) = entry.split_once('_') else {
                continue;
            };
            let Ok(deadline_nanos) = deadline.parse::<u128>() else {
                continue;
            };
            if now_nanos >= deadline_nanos {
                tracing::debug!(name = original, "claim timeout expired, redelivering");
                // A racing ack() may have already removed this entry;
                // that's not an error, just a lost race we don't need.
                let _ = fs::rename(self.in_flight_dir().join(&entry), self.pending_dir().join(original));
            }
        }
        Ok(())
    }

    fn try_claim_one(&self) -> Result<Option<BatchMessage>, StorageError> {
        let mut names = read_dir_files(&self.pending_dir())?;
        names.sort();
        for name in names {
            let deadline_nanos = now_nanos() + self.claim_timeout.as_nanos();
            let claimed_name = format!("{deadline_nanos}_{name}");
            let src = self.pending_dir().join(&name);
            let dst = self.in_flight_dir().join(&claimed_name);
            if fs::rename(&src, &dst).is_err() {
                // Another worker won the race for this file; try the next.
                continue;
            }
            let bytes = fs::read(&dst).map_err(StorageError::new)?;
            let info: BatchInfo = bincode::deserialize(&bytes).map_err(StorageError::new)?;
            return Ok(Some(BatchMessage {
                info,
                delivery_tag: DeliveryToken::File(claimed_name),
            }));
        }
        Ok(None)
    }
}

impl WorkTopic for FileWorkTopic {
    fn poll(&self, timeout: Duration) -> Result<Option<BatchMessage>, StorageError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.requeue_expired()?;
            if let Some(message) = self.try_claim_one()? {
                return Ok(Some(message));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            std::thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }

    fn ack(&self, message: &BatchMessage) -> Result<(), StorageError> {
        if let DeliveryToken::File(name) = &message.delivery_tag {
            match fs::remove_file(self.in_flight_dir().join(name)) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(StorageError::new(e)),
            }
        } else {
            Ok(())
        }
    }
}

fn now_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the unix epoch")
        .as_nanos()
}

fn read_dir_files(dir: &Path) -> Result<Vec<String>, StorageError> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).map_err(StorageError::new)? {
        let entry = entry.map_err(StorageError::new)?;
        if !entry.file_type().map_err(StorageError::new)?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        names.push(name);
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(path: &str) -> BatchInfo {
        BatchInfo {
            storage_path: path.to_string(),
            tick_start: 0,
            tick_end: 0,
        }
    }

    #[test]
    fn delivers_in_publish_order() {
        let dir = tempfile::tempdir().unwrap();
        let topic = FileWorkTopic::open(dir.path(), Duration::from_secs(60)).unwrap();
        topic.publish(&info("b1")).unwrap();
        topic.publish(&info("b2")).unwrap();

        let first = topic.poll(Duration::from_millis(200)).unwrap().unwrap();
        let second = topic.poll(Duration::from_millis(200)).unwrap().unwrap();
        assert_eq!(first.info().storage_path, "b1");
        assert_eq!(second.info().storage_path, "b2");
    }

    #[test]
    fn unacked_message_is_redelivered_after_claim_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let topic = FileWorkTopic::open(dir.path(), Duration::from_millis(30)).unwrap();
        topic.publish(&info("b1")).unwrap();

        let first = topic.poll(Duration::from_millis(200)).unwrap().unwrap();
        assert!(topic.poll(Duration::from_millis(10)).unwrap().is_none());

        std::thread::sleep(Duration::from_millis(50));
        let redelivered = topic.poll(Duration::from_millis(200)).unwrap().unwrap();
        assert_eq!(redelivered.info().storage_path, "b1");
        assert_ne!(redelivered.delivery_tag, first.delivery_tag);
    }

    #[test]
    fn acked_message_is_not_redelivered() {
        let dir = tempfile::tempdir().unwrap();
        let topic = FileWorkTopic::open(dir.path(), Duration::from_millis(20)).unwrap();
        topic.publish(&info("b1")).unwrap();

        let message = topic.poll(Duration::from_millis(200)).unwrap().unwrap();
        topic.ack(&message).unwrap();

        std::thread::sleep(Duration::from_millis(40));
        assert!(topic.poll(Duration::from_millis(10)).unwrap().is_none());
    }
}
