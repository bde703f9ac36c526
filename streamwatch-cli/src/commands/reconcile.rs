//! `streamwatch reconcile`

use anyhow::{Context, Result};
use clap::Args;
use tabled::{settings::Style, Table, Tabled};

use streamwatch_daemon::request_reconcile;

#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// Chat user id to act as, checked against `admin_user_ids`.
    #[arg(long)]
    pub user: Option<String>,

    /// Emit the pass report as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct CountRow {
    #[tabled(rename = "")]
    label: &'static str,
    #[tabled(rename = "count")]
    count: u64,
}

const COUNTERS: [(&str, &str); 8] = [
    ("live", "live"),
    ("rendered", "rendered"),
    ("created", "created"),
    ("updated", "updated"),
    ("deleted", "deleted"),
    ("soft_banned", "soft-banned"),
    ("hard_banned", "hard-banned"),
    ("failures", "failures"),
];

impl ReconcileArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home_dir()?;
        let report = request_reconcile(&home, self.user).context("reconcile failed")?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to render report JSON")?
            );
            return Ok(());
        }

        let rows: Vec<CountRow> = COUNTERS
            .iter()
            .map(|(key, label)| CountRow {
                label: *label,
                count: report[*key].as_u64().unwrap_or_default(),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        println!(
            "pass took {} ms",
            report["duration_ms"].as_u64().unwrap_or_default()
        );
        Ok(())
    }
}
