use anyhow::{Context, Result};
use repairbot_core::BroadcastNotifier;
use std::sync::Arc;

use super::Session;
use crate::cli::app::IssueArgs;

pub async fn execute(session: &Session, args: IssueArgs) -> Result<()> {
    session.profile().await?;
    let pipeline = session.pipeline(Arc::new(BroadcastNotifier::new()))?;

    let issue = pipeline
        .apply_fix(&session.user_id, &args.scan_id, &args.issue_id)
        .await
        .with_context(|| format!("Could not apply fix for issue {}", args.issue_id))?;

    println!("Fixed: {}", issue.title);
    if let Some(url) = issue.pr_url {
        println!("Pull request: {}", url);
    }
    Ok(())
}

pub async fn dismiss(session: &Session, args: IssueArgs) -> Result<()> {
    session.profile().await?;
    let pipeline = session.pipeline(Arc::new(BroadcastNotifier::new()))?;

    let issue = pipeline
        .dismiss_issue(&session.user_id, &args.scan_id, &args.issue_id)
        .await
        .with_context(|| format!("Could not dismiss issue {}", args.issue_id))?;

    println!("Dismissed: {}", issue.title);
    Ok(())
}
