use anyhow::{Context, Result};
use repairbot_core::ScanStore;

use super::scan::print_scan;
use super::{Session, truncate};
use crate::cli::app::ShowArgs;

pub async fn execute(session: &Session) -> Result<()> {
    let scans = session
        .store
        .list_scans(&session.user_id)
        .await
        .context("Failed to read scan history")?;

    if scans.is_empty() {
        println!("No scans yet. Run `repairbot scan <URL>` to start one.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<19}  {:<8}  {:<6}  {:<6}  REPOSITORY",
        "SCAN", "CREATED", "STATUS", "ENGINE", "ISSUES"
    );
    for scan in &scans {
        println!(
            "{:<36}  {:<19}  {:<8}  {:<6}  {:<6}  {}",
            scan.id,
            scan.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            scan.status.to_string(),
            scan.engine.to_string(),
            scan.stats.total_issues(),
            truncate(&format!("{}/{}", scan.target.owner, scan.target.name), 50)
        );
    }
    Ok(())
}

pub async fn show(session: &Session, args: ShowArgs) -> Result<()> {
    let scan = session
        .store
        .get_scan(&session.user_id, &args.scan_id)
        .await
        .with_context(|| format!("Failed to load scan {}", args.scan_id))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&scan)?);
    } else {
        print_scan(&scan);
    }
    Ok(())
}
