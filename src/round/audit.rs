use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::book::{Bet, Settlement};
use crate::ledger::{Gems, RoundNumber};
use crate::wheel::{WheelColor, WheelIndex};

/// A bet as frozen into the round's audit record, with its final settlement.
/// Aborted rounds keep their bets at `pending`; the refund transactions tell
/// the rest of the story.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditedBet {
    #[serde(flatten)]
    pub bet: Bet,
    pub settlement: Settlement,
}

impl AuditedBet {
    pub fn payout(&self) -> Gems {
        match self.settlement {
            Settlement::Won { payout } => payout,
            _ => 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "disposition", rename_all = "snake_case")]
pub enum RoundDisposition {
    Completed,
    Aborted { reason: String },
}

/// One row per terminated round. Everything an independent verifier needs
/// to replay the commit-reveal chain, plus the frozen bet list and money
/// totals. The highest round number on record seeds the counter on restart.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundAuditRecord {
    pub round_number: RoundNumber,
    pub commitment: String,
    pub server_seed: String,
    pub client_seed: String,
    pub nonce: u64,
    #[serde(flatten)]
    pub disposition: RoundDisposition,
    pub outcome_number: Option<WheelIndex>,
    pub outcome_color: Option<WheelColor>,
    pub outcome_drawn_at: Option<DateTime<Utc>>,
    pub bets: Vec<AuditedBet>,
    pub total_staked: Gems,
    pub total_paid_out: Gems,
    pub ended_at: DateTime<Utc>,
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, record: &RoundAuditRecord) -> anyhow::Result<()>;

    /// Highest round number on record, if any.
    async fn last_round_number(&self) -> anyhow::Result<Option<RoundNumber>>;

    async fn load(&self, round_number: RoundNumber) -> anyhow::Result<Option<RoundAuditRecord>>;
}

#[derive(Default)]
pub struct InMemoryAuditStore {
    records: parking_lot::Mutex<Vec<RoundAuditRecord>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<RoundAuditRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append(&self, record: &RoundAuditRecord) -> anyhow::Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }

    async fn last_round_number(&self) -> anyhow::Result<Option<RoundNumber>> {
        Ok(self
            .records
            .lock()
            .iter()
            .map(|record| record.round_number)
            .max())
    }

    async fn load(&self, round_number: RoundNumber) -> anyhow::Result<Option<RoundAuditRecord>> {
        Ok(self
            .records
            .lock()
            .iter()
            .find(|record| record.round_number == round_number)
            .cloned())
    }
}

/// One JSON document per terminated round, appended in round order.
pub struct JsonlAuditStore {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlAuditStore {
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
            .with_context(|| format!("failed to open round audit log {}", path.display()))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    async fn load_all(&self) -> anyhow::Result<Vec<RoundAuditRecord>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read audit log {}", self.path.display()))
            }
        };
        let mut records = Vec::new();
        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            records.push(
                serde_json::from_str(line)
                    .with_context(|| format!("corrupt audit line in {}", self.path.display()))?,
            );
        }
        Ok(records)
    }
}

#[async_trait]
impl AuditStore for JsonlAuditStore {
    async fn append(&self, record: &RoundAuditRecord) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn last_round_number(&self) -> anyhow::Result<Option<RoundNumber>> {
        Ok(self
            .load_all()
            .await?
            .iter()
            .map(|record| record.round_number)
            .max())
    }

    async fn load(&self, round_number: RoundNumber) -> anyhow::Result<Option<RoundAuditRecord>> {
        Ok(self
            .load_all()
            .await?
            .into_iter()
            .find(|record| record.round_number == round_number))
    }
}
