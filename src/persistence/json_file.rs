// =============================================================================
// JSON File Store — positions.json + trades.jsonl + verdicts.jsonl
// =============================================================================
//
// Layout under `data_dir`:
//   positions.json   map symbol -> Position, rewritten atomically
//                      (tmp + rename) on every save.
//   trades.jsonl     one Trade per line, append-only.
//   verdicts.jsonl   one VerdictRecord per line, append-only.
//
// Unparseable lines are skipped with a warning so one corrupt record never
// hides the rest of the history.
// =============================================================================

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use super::Store;
use crate::audit::VerdictRecord;
use crate::position_ledger::{Position, Trade};

const POSITIONS_FILE: &str = "positions.json";
const TRADES_FILE: &str = "trades.jsonl";
const VERDICTS_FILE: &str = "verdicts.jsonl";

pub struct JsonFileStore {
    dir: PathBuf,
    /// Serialises read-modify-write of positions.json and line appends.
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create data dir {}", dir.display()))?;
        info!(dir = %dir.display(), "json file store opened");
        Ok(Self {
            dir,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    async fn read_position_map(&self) -> Result<BTreeMap<String, Position>> {
        let path = self.path(POSITIONS_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("failed to parse {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    async fn append_line<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.path(name);
        let mut line = serde_json::to_string(value).context("failed to serialise record")?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("failed to open {}", path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("failed to append to {}", path.display()))?;
        file.flush().await?;
        Ok(())
    }
}

async fn read_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("failed to read {}", path.display())),
    };

    let mut out = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(v) => out.push(v),
            Err(e) => warn!(
                file = %path.display(),
                line = idx + 1,
                error = %e,
                "skipping unparseable record"
            ),
        }
    }
    Ok(out)
}

#[async_trait]
impl Store for JsonFileStore {
    async fn save_position(&self, position: &Position) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut map = self.read_position_map().await?;
        map.insert(position.symbol.clone(), position.clone());

        let content =
            serde_json::to_string_pretty(&map).context("failed to serialise positions")?;
        let path = self.path(POSITIONS_FILE);
        let tmp_path = path.with_extension("json.tmp");

        tokio::fs::write(&tmp_path, content)
            .await
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .with_context(|| format!("failed to rename {}", tmp_path.display()))?;
        Ok(())
    }

    async fn append_trade(&self, trade: &Trade) -> Result<()> {
        self.append_line(TRADES_FILE, trade).await
    }

    async fn append_verdict(&self, record: &VerdictRecord) -> Result<()> {
        self.append_line(VERDICTS_FILE, record).await
    }

    async fn load_positions(&self) -> Result<Vec<Position>> {
        Ok(self.read_position_map().await?.into_values().collect())
    }

    async fn load_trades(&self) -> Result<Vec<Trade>> {
        read_lines(&self.path(TRADES_FILE)).await
    }

    async fn load_verdicts(&self) -> Result<Vec<VerdictRecord>> {
        read_lines(&self.path(VERDICTS_FILE)).await
    }
}
