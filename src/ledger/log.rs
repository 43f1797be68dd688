use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::types::TxnRecord;

/// Append-only durable record of every committed ledger transaction.
/// Replaying [`TransactionLog::load`] reconstructs balances and the
/// idempotency table after a restart.
#[async_trait]
pub trait TransactionLog: Send + Sync {
    /// Append a batch of committed records. The batch must land as a unit;
    /// an error means none of it is considered durable.
    async fn append(&self, records: &[TxnRecord]) -> anyhow::Result<()>;

    /// Read back every record in commit order.
    async fn load(&self) -> anyhow::Result<Vec<TxnRecord>>;
}

#[derive(Default)]
pub struct InMemoryTransactionLog {
    records: parking_lot::Mutex<Vec<TxnRecord>>,
}

impl InMemoryTransactionLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionLog for InMemoryTransactionLog {
    async fn append(&self, records: &[TxnRecord]) -> anyhow::Result<()> {
        self.records.lock().extend_from_slice(records);
        Ok(())
    }

    async fn load(&self) -> anyhow::Result<Vec<TxnRecord>> {
        Ok(self.records.lock().clone())
    }
}

/// One JSON document per line, flushed per append.
pub struct JsonlTransactionLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlTransactionLog {
    pub async fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("failed to open transaction log {}", path.display()))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }
}

#[async_trait]
impl TransactionLog for JsonlTransactionLog {
    async fn append(&self, records: &[TxnRecord]) -> anyhow::Result<()> {
        let mut buf = String::new();
        for record in records {
            buf.push_str(&serde_json::to_string(record)?);
            buf.push('\n');
        }
        let mut file = self.file.lock().await;
        file.write_all(buf.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn load(&self) -> anyhow::Result<Vec<TxnRecord>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to read transaction log {}", self.path.display())
                })
            }
        };
        let mut records = Vec::new();
        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(line).with_context(|| {
                format!("corrupt transaction log line in {}", self.path.display())
            })?);
        }
        Ok(records)
    }
}
