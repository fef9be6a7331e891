use anyhow::{Context, Result};
use repairbot_core::notify::UserEvent;
use repairbot_core::{BroadcastNotifier, ProgressEvent, ScanResult, ScanStatus};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::{Session, truncate};
use crate::cli::app::ScanArgs;

pub async fn execute(session: &Session, args: ScanArgs) -> Result<()> {
    session.profile().await?;

    let notifier = Arc::new(BroadcastNotifier::new());
    let printer = tokio::spawn(print_progress(
        notifier.subscribe(),
        session.user_id.clone(),
        args.json,
    ));
    let pipeline = session.pipeline(notifier.clone())?;

    info!("Scanning {} with {}", args.url, args.engine);
    let outcome = pipeline.run_scan(&session.user_id, &args.url, args.engine).await;

    // Closing the channel lets the printer drain and stop
    drop(pipeline);
    drop(notifier);
    join_printer(printer).await;

    let scan = outcome.with_context(|| format!("Scan of {} failed", args.url))?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&scan)?);
    } else {
        print_scan(&scan);
    }
    Ok(())
}

/// Wait for the progress printer, logging a panic instead of propagating it
async fn join_printer(printer: JoinHandle<()>) {
    if let Err(err) = printer.await {
        warn!("Progress printer stopped abnormally: {}", err);
    }
}

async fn print_progress(
    mut events: broadcast::Receiver<UserEvent>,
    owner: String,
    quiet: bool,
) {
    loop {
        match events.recv().await {
            Ok(UserEvent { user_id, event }) if user_id == owner => {
                if !quiet && !matches!(event, ProgressEvent::ScanCompleted { .. }) {
                    eprintln!("  {}", event.describe());
                }
            }
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Human readable scan summary and issue table
pub fn print_scan(scan: &ScanResult) {
    println!("Scan {}", scan.id);
    println!(
        "  Repository: {}/{} ({} branch, {})",
        scan.target.owner, scan.target.name, scan.target.branch, scan.target.platform
    );
    println!("  Engine:     {}", scan.engine);
    println!("  Status:     {}", scan.status);
    println!("  Created:    {}", scan.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(error) = &scan.error {
        println!("  Error:      {}", error);
    }
    if scan.status != ScanStatus::Scanned {
        return;
    }

    let stats = &scan.stats;
    println!(
        "  Files:      {} ({} lines)",
        stats.total_files, stats.total_lines
    );
    println!(
        "  Issues:     {} (critical {}, high {}, medium {}, low {})",
        stats.total_issues(),
        stats.critical,
        stats.high,
        stats.medium,
        stats.low
    );

    if scan.issues.is_empty() {
        println!("\nNo issues found.");
        return;
    }

    println!();
    println!(
        "{:<36}  {:<8}  {:<12}  {:<9}  {:<40}  LOCATION",
        "ISSUE", "SEVERITY", "TYPE", "STATUS", "TITLE"
    );
    for issue in &scan.issues {
        let location = match issue.line {
            Some(line) => format!("{}:{}", issue.file, line),
            None => issue.file.clone(),
        };
        println!(
            "{:<36}  {:<8}  {:<12}  {:<9}  {:<40}  {}",
            issue.id,
            issue.severity.to_string(),
            issue.issue_type.to_string(),
            issue.status.to_string(),
            truncate(&issue.title, 40),
            location
        );
        if let Some(url) = &issue.pr_url {
            println!("{:<36}  pull request: {}", "", url);
        }
    }
}
