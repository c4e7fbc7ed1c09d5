use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bot::scheduler::PassEvent;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchMetrics {
    pub started_at: DateTime<Utc>,
    pub blocks_seen: u64,
    pub last_block: Option<u64>,
    pub passes_started: u64,
    pub passes_completed: u64,
    pub passes_cancelled: u64,
    pub passes_failed: u64,
    pub total_opportunities_found: u64,
    pub best_profit: Option<f64>,
    pub best_profit_block: Option<u64>,
    pub last_error: Option<String>,
    pub last_updated: DateTime<Utc>,
}

impl SearchMetrics {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            blocks_seen: 0,
            last_block: None,
            passes_started: 0,
            passes_completed: 0,
            passes_cancelled: 0,
            passes_failed: 0,
            total_opportunities_found: 0,
            best_profit: None,
            best_profit_block: None,
            last_error: None,
            last_updated: now,
        }
    }

    pub fn record_block(&mut self, block: u64) {
        self.blocks_seen += 1;
        self.last_block = Some(block);
        self.last_updated = Utc::now();
    }

    pub fn record_event(&mut self, event: &PassEvent) {
        match event {
            PassEvent::Started { .. } => self.passes_started += 1,
            PassEvent::Completed { block, summary } => {
                self.passes_completed += 1;
                self.total_opportunities_found += summary.opportunities as u64;

                if let Some(profit) = summary.best_profit {
                    if self.best_profit.map_or(true, |best| profit > best) {
                        self.best_profit = Some(profit);
                        self.best_profit_block = Some(*block);
                    }
                }
            }
            PassEvent::Cancelled { .. } => self.passes_cancelled += 1,
            PassEvent::Failed { block, message } => {
                self.passes_failed += 1;
                self.last_error = Some(format!("block {}: {}", block, message));
            }
        }
        self.last_updated = Utc::now();
    }

    /// Share of finished passes that completed; cancelled passes are not failures.
    pub fn success_rate(&self) -> f64 {
        let finished = self.passes_completed + self.passes_failed;
        if finished == 0 {
            0.0
        } else {
            self.passes_completed as f64 / finished as f64
        }
    }

    pub fn uptime_seconds(&self) -> i64 {
        (self.last_updated - self.started_at).num_seconds()
    }

    pub fn generate_report(&self) -> String {
        let mut report = String::new();

        report.push_str("=== Crossed Market Searcher Metrics ===\n");
        report.push_str(&format!("Uptime: {} seconds\n", self.uptime_seconds()));
        report.push_str(&format!("Blocks Seen: {}\n", self.blocks_seen));
        if let Some(block) = self.last_block {
            report.push_str(&format!("Last Block: {}\n", block));
        }
        report.push_str(&format!(
            "Passes: {} started, {} completed, {} cancelled, {} failed\n",
            self.passes_started, self.passes_completed, self.passes_cancelled, self.passes_failed
        ));
        report.push_str(&format!("Success Rate: {:.2}%\n", self.success_rate() * 100.0));
        report.push_str(&format!("Opportunities Found: {}\n", self.total_opportunities_found));

        if let (Some(profit), Some(block)) = (self.best_profit, self.best_profit_block) {
            report.push_str(&format!("Best Profit: {:.6} ETH (block {})\n", profit, block));
        }

        if let Some(ref error) = self.last_error {
            report.push_str(&format!("Last Error: {}\n", error));
        }

        report.push_str(&format!("\nLast Updated: {}\n", self.last_updated));

        report
    }

    pub fn export_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize metrics: {}", e))
    }

}

impl Default for SearchMetrics {
    fn default() -> Self {
        Self::new()
    }
}
