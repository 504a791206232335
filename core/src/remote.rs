use std::collections::BTreeMap;
use std::future::Future;

use chrono::NaiveDate;
use parking_lot::Mutex;

use crate::error::{Result, SyncError};
use crate::record::Record;

/// Remote document store for one record kind.
///
/// Implementations live with the platform (HTTP client, cloud SDK, ...). Any
/// transport or server failure should surface as [`SyncError::RemoteUnavailable`].
pub trait RemoteRecordService<R: Record>: Send + Sync {
    fn get(&self, user_id: &str, date: NaiveDate)
    -> impl Future<Output = Result<Option<R>>> + Send;

    fn put(&self, record: &R) -> impl Future<Output = Result<()>> + Send;

    /// Records of `user_id` dated `start..=end`.
    fn query_range(
        &self,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> impl Future<Output = Result<Vec<R>>> + Send;
}

/// Remote backed by a map, for local runs and tests. Can be switched offline.
pub struct MemoryRemote<R> {
    records: Mutex<BTreeMap<String, R>>,
    offline: Mutex<bool>,
}

impl<R: Record> Default for MemoryRemote<R> {
    fn default() -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
            offline: Mutex::new(false),
        }
    }
}

impl<R: Record> MemoryRemote<R> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_records(records: impl IntoIterator<Item = R>) -> Self {
        let remote = Self::default();
        remote
            .records
            .lock()
            .extend(records.into_iter().map(|r| (r.key(), r)));
        remote
    }

    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock() = offline;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn snapshot(&self, key: &str) -> Option<R> {
        self.records.lock().get(key).cloned()
    }

    fn check_online(&self) -> Result<()> {
        if *self.offline.lock() {
            return Err(SyncError::RemoteUnavailable("remote is offline".to_string()));
        }
        Ok(())
    }
}

impl<R: Record> RemoteRecordService<R> for MemoryRemote<R> {
    async fn get(&self, user_id: &str, date: NaiveDate) -> Result<Option<R>> {
        self.check_online()?;
        Ok(self
            .records
            .lock()
            .values()
            .find(|r| r.user_id() == user_id && r.date() == date)
            .cloned())
    }

    async fn put(&self, record: &R) -> Result<()> {
        self.check_online()?;
        self.records.lock().insert(record.key(), record.clone());
        Ok(())
    }

    async fn query_range(&self, user_id: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<R>> {
        self.check_online()?;
        let mut out: Vec<R> = self
            .records
            .lock()
            .values()
            .filter(|r| r.user_id() == user_id && r.date() >= start && r.date() <= end)
            .cloned()
            .collect();
        out.sort_by_key(Record::order_key);
        Ok(out)
    }
}
