use anyhow::{Context, Result};
use chrono::Duration;
use repairbot_core::models::USAGE_PERIOD_DAYS;
use repairbot_core::{Engine, QuotaKind, User, UserStore};

use super::Session;
use crate::cli::app::ProfileCommand;

pub async fn execute(session: &Session, command: ProfileCommand) -> Result<()> {
    let mut user = session.profile().await?;

    match command {
        ProfileCommand::Show => {
            print_profile(&user);
            return Ok(());
        }
        ProfileCommand::SetToken { token } => {
            if token.trim().is_empty() {
                anyhow::bail!("Token must not be empty");
            }
            user.github_token = Some(token.trim().to_string());
            println!("GitHub token stored for profile '{}'", user.id);
        }
        ProfileCommand::ClearToken => {
            user.github_token = None;
            println!("GitHub token removed from profile '{}'", user.id);
        }
        ProfileCommand::SetPlan { plan } => {
            user.plan = plan;
            println!("Profile '{}' is now on the {} plan", user.id, plan);
        }
    }

    session.store.save_user(&user).await.context("Failed to save profile")?;
    Ok(())
}

fn print_profile(user: &User) {
    let limit = |kind: QuotaKind| match user.plan.limit(kind) {
        Some(limit) => limit.to_string(),
        None => "unlimited".to_string(),
    };
    let engines: Vec<String> = Engine::ALL
        .iter()
        .filter(|e| e.is_permitted_for(user.plan))
        .map(|e| e.to_string())
        .collect();

    println!("Profile:  {}", user.id);
    println!("Plan:     {}", user.plan);
    println!("Engines:  {}", engines.join(", "));
    println!("Token:    {}", if user.credential().is_some() { "set" } else { "not set" });
    println!(
        "Scans:    {} / {}",
        user.usage.used(QuotaKind::Scans),
        limit(QuotaKind::Scans)
    );
    println!(
        "Fixes:    {} / {}",
        user.usage.used(QuotaKind::Fixes),
        limit(QuotaKind::Fixes)
    );
    println!(
        "Resets:   {}",
        (user.usage.period_start + Duration::days(USAGE_PERIOD_DAYS)).format("%Y-%m-%d")
    );
}
