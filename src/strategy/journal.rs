use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::{
    fs::OpenOptions,
    io::AsyncWriteExt,
    sync::Mutex,
};

use crate::{
    error::{CounterError, CounterResult},
    period::{Limits, Period},
    scope::Scope,
    strategy::{CounterRow, CounterStrategy, RowKey},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct JournalEntry {
    #[serde(flatten)]
    key: RowKey,
    delta: i64,
    // Epoch seconds the increment happened at.
    at: i64,
    expires_at: i64,
}

pub struct JournalStrategy {
    rows: DashMap<RowKey, CounterRow>,
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JournalStrategy {
    pub async fn open(path: impl Into<PathBuf>) -> CounterResult<Self> {
        let path = path.into();
        let rows = DashMap::new();

        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let mut replayed = 0usize;
                for (idx, line) in contents.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<JournalEntry>(line) {
                        Ok(entry) => {
                            apply(&rows, entry);
                            replayed += 1;
                        }
                        Err(err) => tracing::warn!(
                            path = %path.display(),
                            line = idx + 1,
                            error = %err,
                            "skipping malformed journal entry"
                        ),
                    }
                }
                tracing::info!(path = %path.display(), replayed, "replayed counter journal");
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(io_error("read", &path, err)),
        }

        let strategy = Self {
            rows,
            path,
            write_lock: Mutex::new(()),
        };
        strategy.compact(Utc::now()).await?;
        Ok(strategy)
    }

    // Drops expired rows and rewrites the journal with one entry per live row.
    pub async fn compact(&self, now: DateTime<Utc>) -> CounterResult<usize> {
        let _guard = self.write_lock.lock().await;
        let at = now.timestamp();
        self.rows.retain(|_, row| row.expires_at > at);

        let mut buf = String::new();
        for row in self.rows.iter() {
            push_line(
                &mut buf,
                &JournalEntry {
                    key: row.key.clone(),
                    delta: row.value,
                    at,
                    expires_at: row.expires_at,
                },
            )?;
        }

        let tmp = self.path.with_extension("compact");
        tokio::fs::write(&tmp, buf.as_bytes())
            .await
            .map_err(|e| io_error("write", &tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| io_error("replace", &self.path, e))?;
        Ok(self.rows.len())
    }

    // Compacts on every tick until the strategy is dropped.
    pub fn spawn_compactor(self: &Arc<Self>, every: Duration) {
        if every.is_zero() {
            return;
        }
        let journal = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(journal) = journal.upgrade() else {
                    break;
                };
                match journal.compact(Utc::now()).await {
                    Ok(live) => tracing::debug!(live, "compacted counter journal"),
                    Err(err) => tracing::warn!(error = %err, "counter journal compaction failed"),
                }
            }
        });
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    async fn append(&self, bytes: &[u8]) -> CounterResult<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| io_error("open", &self.path, e))?;
        file.write_all(bytes)
            .await
            .map_err(|e| io_error("append to", &self.path, e))?;
        file.sync_data()
            .await
            .map_err(|e| io_error("sync", &self.path, e))
    }
}

#[async_trait]
impl CounterStrategy for JournalStrategy {
    fn name(&self) -> &'static str {
        "journal"
    }

    async fn increment(
        &self,
        limits: &Limits,
        identifier: &str,
        now: DateTime<Utc>,
        scope: &Scope,
        value: i64,
    ) -> CounterResult<()> {
        let at = now.timestamp();
        let entries: Vec<JournalEntry> = limits
            .enabled()
            .map(|period| JournalEntry {
                key: RowKey::new(scope, identifier, period, now),
                delta: value,
                at,
                expires_at: at + period.expiration_secs(),
            })
            .collect();
        if entries.is_empty() {
            return Ok(());
        }

        let mut buf = String::new();
        for entry in &entries {
            push_line(&mut buf, entry)?;
        }

        let _guard = self.write_lock.lock().await;
        self.append(buf.as_bytes()).await?;
        for entry in entries {
            apply(&self.rows, entry);
        }
        Ok(())
    }

    async fn find(
        &self,
        identifier: &str,
        period: Period,
        now: DateTime<Utc>,
        scope: &Scope,
    ) -> CounterResult<Option<CounterRow>> {
        let key = RowKey::new(scope, identifier, period, now);
        let at = now.timestamp();
        Ok(self
            .rows
            .get(&key)
            .filter(|row| row.expires_at > at)
            .map(|row| row.clone()))
    }
}

fn apply(rows: &DashMap<RowKey, CounterRow>, entry: JournalEntry) {
    let mut row = rows
        .entry(entry.key.clone())
        .or_insert_with(|| CounterRow {
            key: entry.key,
            value: 0,
            expires_at: entry.expires_at,
        });
    if row.expires_at <= entry.at {
        row.value = 0;
        row.expires_at = entry.expires_at;
    }
    row.value = row.value.saturating_add(entry.delta);
}

fn push_line(buf: &mut String, entry: &JournalEntry) -> CounterResult<()> {
    let line = serde_json::to_string(entry)
        .map_err(|e| CounterError::Strategy(format!("failed to encode journal entry: {e}")))?;
    buf.push_str(&line);
    buf.push('\n');
    Ok(())
}

fn io_error(action: &str, path: &Path, err: io::Error) -> CounterError {
    CounterError::Strategy(format!("failed to {action} journal {}: {err}", path.display()))
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use uuid::Uuid;

    use super::*;

    fn temp_journal() -> PathBuf {
        std::env::temp_dir().join(format!("windowcount-{}.jsonl", Uuid::new_v4()))
    }

    #[tokio::test]
    async fn increments_survive_reopen() {
        let path = temp_journal();
        let now = Utc::now();
        let scope = Scope::new(Some(Uuid::new_v4()), None);
        let limits = Limits::new().with(Period::Hour, true).with(Period::Day, true);

        {
            let journal = JournalStrategy::open(&path).await.unwrap();
            journal.increment(&limits, "client-A", now, &scope, 3).await.unwrap();
            journal.increment(&limits, "client-A", now, &scope, 4).await.unwrap();
        }

        let reopened = JournalStrategy::open(&path).await.unwrap();
        let row = reopened
            .find("client-A", Period::Hour, now, &scope)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.value, 7);
        assert_eq!(row.expires_at, now.timestamp() + 3_600);

        let compacted = std::fs::read_to_string(&path).unwrap();
        assert_eq!(compacted.lines().count(), 2);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn missing_and_expired_rows_are_absent() {
        let path = temp_journal();
        let now = Utc::now();
        let scope = Scope::unscoped();
        let journal = JournalStrategy::open(&path).await.unwrap();

        assert!(journal
            .find("nobody", Period::Second, now, &scope)
            .await
            .unwrap()
            .is_none());

        let limits = Limits::new().with(Period::Minute, true);
        journal.increment(&limits, "client-A", now, &scope, 1).await.unwrap();
        let later = now + Duration::seconds(61);
        let row = journal.find("client-A", Period::Minute, later, &scope).await.unwrap();
        assert!(row.is_none());

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn compaction_drops_expired_rows_while_running() {
        let path = temp_journal();
        let now = Utc::now();
        let scope = Scope::unscoped();
        let journal = JournalStrategy::open(&path).await.unwrap();

        journal
            .increment(&Limits::new().with(Period::Second, true), "client-A", now, &scope, 1)
            .await
            .unwrap();
        journal
            .increment(&Limits::new().with(Period::Day, true), "client-A", now, &scope, 1)
            .await
            .unwrap();
        assert_eq!(journal.len(), 2);

        assert_eq!(journal.compact(now + Duration::seconds(2)).await.unwrap(), 1);
        assert_eq!(journal.len(), 1);
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 1);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn background_compactor_purges_stale_rows() {
        let path = temp_journal();
        let scope = Scope::unscoped();
        let journal = Arc::new(JournalStrategy::open(&path).await.unwrap());
        let long_ago = Utc::now() - Duration::hours(2);

        journal
            .increment(&Limits::new().with(Period::Minute, true), "client-A", long_ago, &scope, 5)
            .await
            .unwrap();
        assert_eq!(journal.len(), 1);

        journal.spawn_compactor(std::time::Duration::from_millis(10));
        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while !journal.is_empty() {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("compactor never purged the expired row");

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn unwritable_journal_is_a_strategy_error() {
        let dir = std::env::temp_dir().join(format!("windowcount-missing-{}", Uuid::new_v4()));
        let err = match JournalStrategy::open(dir.join("nested").join("c.jsonl")).await {
            Ok(_) => panic!("journal in missing directory should not open"),
            Err(err) => err,
        };
        assert!(matches!(err, CounterError::Strategy(_)));
    }
}
