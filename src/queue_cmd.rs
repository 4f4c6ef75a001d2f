//! `exopedia queue` and `exopedia jobs reconcile`.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::db;
use crate::get::format_ts_iso;
use crate::jobs::JobLedger;
use crate::migrate;

/// Print a creation job and its log.
pub async fn run_queue(config: &Config, id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    let ledger = JobLedger::new(pool.clone());

    let Some(job) = ledger.get_job(id).await? else {
        pool.close().await;
        bail!("job not found: {}", id);
    };
    let logs = ledger.logs(id).await?;
    pool.close().await;

    println!("--- Job ---");
    println!("id:           {}", job.id);
    println!("link:         {} -> {}", job.source_slug, job.target_slug);
    println!("status:       {}", job.status);
    if let Some(ref slug) = job.result_slug {
        println!("result:       /wiki/{}", slug);
    }
    if let Some(ref err) = job.error_message {
        println!("error:        {}", err);
    }
    println!("created_at:   {}", format_ts_iso(job.created_at));
    if let Some(ts) = job.started_at {
        println!("started_at:   {}", format_ts_iso(ts));
    }
    if let Some(ts) = job.finished_at {
        println!("finished_at:  {}", format_ts_iso(ts));
    }

    println!();
    println!("--- Log ({} entries) ---", logs.len());
    for entry in &logs {
        let tool = entry
            .tool_name
            .as_deref()
            .map(|t| format!(" [{}]", t))
            .unwrap_or_default();
        println!(
            "{} {:<5} {:<10}{} {}",
            format_ts_iso(entry.ts),
            entry.level.as_str(),
            entry.phase.as_str(),
            tool,
            entry.message
        );
        if let Some(ref args) = entry.args_snippet {
            println!("    args:   {}", args);
        }
        if let Some(ref result) = entry.result_snippet {
            println!("    result: {}", result);
        }
    }

    Ok(())
}

/// Fail jobs that outlived the run ceiling.
pub async fn run_reconcile(config: &Config, max_age_secs: Option<i64>) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    let ledger = JobLedger::new(pool.clone());

    let max_age = max_age_secs.unwrap_or(config.jobs.max_duration_secs as i64);
    let failed = ledger.reconcile_stale(max_age).await?;
    pool.close().await;

    println!("jobs reconcile");
    println!("  max age: {}s", max_age);
    println!("  failed: {}", failed);
    Ok(())
}
