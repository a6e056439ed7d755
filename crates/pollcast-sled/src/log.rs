//! Notification rows stored in sled.
//!
//! Each NOTIFY appends one row keyed by a big-endian id. Ids are dense: a
//! writer claims the id after the newest row with a compare-and-swap on that
//! key, so a row only appears once every lower id has been written. Readers
//! remember the next id they have not seen and never skip past a missing one.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sled::{Db, Tree};

use crate::error::Error;

/// Tree holding notification rows.
pub const NOTIFICATIONS_TREE: &str = "pollcast:notifications";

/// A stored notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// Row id, assigned on append.
    #[serde(skip)]
    pub id: u64,
    /// Channel the notification was sent on.
    pub channel: String,
    /// Raw text payload.
    pub payload: String,
    /// Milliseconds since the Unix epoch when the row was written.
    pub created_at_ms: u64,
}

/// Append-only notification log backed by a sled tree.
#[derive(Clone)]
pub struct NotificationLog {
    tree: Tree,
}

impl NotificationLog {
    /// Open or create the notification log in the given database.
    pub fn open(db: &Db) -> Result<Self, Error> {
        let tree = db.open_tree(NOTIFICATIONS_TREE)?;
        Ok(Self { tree })
    }

    /// Append a notification and return its id.
    pub fn append(&self, channel: &str, payload: &str) -> Result<u64, Error> {
        loop {
            let id = self.next_id()?;
            let record = NotificationRecord {
                id,
                channel: channel.to_string(),
                payload: payload.to_string(),
                created_at_ms: now_ms(),
            };
            let value = serde_json::to_vec(&record)?;

            // Another writer took this id; claim the next one.
            if self
                .tree
                .compare_and_swap(id.to_be_bytes(), None::<&[u8]>, Some(value))?
                .is_ok()
            {
                return Ok(id);
            }
        }
    }

    /// Id following the newest row, i.e. the first id a new reader has not seen.
    pub fn next_id(&self) -> Result<u64, Error> {
        Ok(self.last_id()?.map_or(0, |id| id + 1))
    }

    /// Read up to `limit` consecutive rows starting at `from_id`, oldest first.
    ///
    /// Stops at the first id that has not been written yet. If `from_id` was
    /// already pruned, reading resumes at the oldest remaining row.
    pub fn read_from(&self, from_id: u64, limit: usize) -> Result<Vec<NotificationRecord>, Error> {
        let mut records = Vec::with_capacity(limit.min(1024));
        let mut id = from_id;

        while records.len() < limit {
            match self.tree.get(id.to_be_bytes())? {
                Some(value) => {
                    let mut record: NotificationRecord = serde_json::from_slice(&value)?;
                    record.id = id;
                    records.push(record);
                    id += 1;
                }
                None => match self.first_id()? {
                    Some(first) if first > id => id = first,
                    _ => break,
                },
            }
        }

        Ok(records)
    }

    /// Remove up to `limit` of the oldest rows written before `cutoff_ms`.
    ///
    /// The newest row is always kept so ids keep increasing. Returns the
    /// number of rows removed.
    pub fn prune_before(&self, cutoff_ms: u64, limit: usize) -> Result<usize, Error> {
        let Some(newest) = self.last_id()? else {
            return Ok(0);
        };

        let mut removed = 0;
        for result in self.tree.iter().take(limit) {
            let (key, value) = result?;
            if decode_key(&key)? >= newest {
                break;
            }
            let record: NotificationRecord = serde_json::from_slice(&value)?;
            if record.created_at_ms >= cutoff_ms {
                break;
            }
            self.tree.remove(key)?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Number of stored rows.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// Check if the log is empty.
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    fn first_id(&self) -> Result<Option<u64>, Error> {
        self.tree
            .first()?
            .map(|(key, _)| decode_key(&key))
            .transpose()
    }

    fn last_id(&self) -> Result<Option<u64>, Error> {
        self.tree
            .last()?
            .map(|(key, _)| decode_key(&key))
            .transpose()
    }
}

fn decode_key(key: &[u8]) -> Result<u64, Error> {
    let bytes: [u8; 8] = key.try_into().map_err(|_| Error::InvalidKey)?;
    Ok(u64::from_be_bytes(bytes))
}

/// Current time in milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
