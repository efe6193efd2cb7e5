// In-memory `Store` for tests. `set_failing(true)` makes every write error.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;

use super::Store;
use crate::audit::VerdictRecord;
use crate::position_ledger::{Position, Trade};

#[derive(Default)]
pub struct MemoryStore {
    positions: Mutex<BTreeMap<String, Position>>,
    trades: Mutex<Vec<Trade>>,
    verdicts: Mutex<Vec<VerdictRecord>>,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn positions(&self) -> Vec<Position> {
        self.positions.lock().values().cloned().collect()
    }

    pub fn trades(&self) -> Vec<Trade> {
        self.trades.lock().clone()
    }

    pub fn verdicts(&self) -> Vec<VerdictRecord> {
        self.verdicts.lock().clone()
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("memory store is failing");
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn save_position(&self, position: &Position) -> Result<()> {
        self.check()?;
        self.positions
            .lock()
            .insert(position.symbol.clone(), position.clone());
        Ok(())
    }

    async fn append_trade(&self, trade: &Trade) -> Result<()> {
        self.check()?;
        self.trades.lock().push(trade.clone());
        Ok(())
    }

    async fn append_verdict(&self, record: &VerdictRecord) -> Result<()> {
        self.check()?;
        self.verdicts.lock().push(record.clone());
        Ok(())
    }

    async fn load_positions(&self) -> Result<Vec<Position>> {
        self.check()?;
        Ok(self.positions())
    }

    async fn load_trades(&self) -> Result<Vec<Trade>> {
        self.check()?;
        Ok(self.trades())
    }

    async fn load_verdicts(&self) -> Result<Vec<VerdictRecord>> {
        self.check()?;
        Ok(self.verdicts())
    }
}
