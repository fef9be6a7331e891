use clap::{Args, Parser, Subcommand};
use repairbot_core::{Engine, Plan};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "repairbot",
    version,
    about = "RepairBot - find bugs in a GitHub repository and open pull requests that fix them",
    long_about = "RepairBot scans a sample of a repository's source files with an AI engine, \
                  stores the issues it finds, and can open a pull request with the suggested \
                  fix for any one of them."
)]
pub struct Cli {
    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Local profile to act as
    #[arg(long, global = true, default_value = "local")]
    pub user: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan a repository
    #[command(about = "Scan a GitHub repository for issues")]
    Scan(ScanArgs),

    /// Open a pull request for an issue
    #[command(about = "Apply the suggested fix for an issue as a pull request")]
    Fix(IssueArgs),

    /// Dismiss an issue
    #[command(about = "Mark an open issue as dismissed")]
    Dismiss(IssueArgs),

    /// List past scans
    #[command(about = "List the scans of the current profile, newest first")]
    History,

    /// Show one scan
    #[command(about = "Show a scan and its issues")]
    Show(ShowArgs),

    /// Manage the local profile
    #[command(subcommand, about = "Show or change the local profile (token, plan, usage)")]
    Profile(ProfileCommand),

    /// Write a default configuration file
    #[command(about = "Write a default configuration file")]
    Init(InitArgs),
}

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Repository URL, e.g. https://github.com/owner/repo
    pub url: String,

    /// Analysis engine
    #[arg(short, long, default_value_t = Engine::Groq)]
    pub engine: Engine,

    /// Print the scan result as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct IssueArgs {
    /// Scan id (as printed by `scan` and `history`)
    pub scan_id: String,

    /// Issue id within the scan
    pub issue_id: String,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    pub scan_id: String,

    /// Print the scan as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum ProfileCommand {
    /// Show plan, token status and usage
    Show,

    /// Store the GitHub token used for private repositories and fixes
    SetToken { token: String },

    /// Remove the stored GitHub token
    ClearToken,

    /// Change the plan
    SetPlan { plan: Plan },
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}
