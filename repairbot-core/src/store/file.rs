use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{ScanStore, UserStore, bump, newest_first, replace_issue};
use crate::error::{QuotaKind, RepairError, RepairResult};
use crate::models::{Issue, IssueStatus, ScanResult, Usage, User};

/// JSON documents under a data directory:
/// `users/<user>.json` and `scans/<user>/<scan>.json`
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    // Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn user_path(&self, user_id: &str) -> RepairResult<PathBuf> {
        Ok(self.root.join("users").join(format!("{}.json", checked_id(user_id)?)))
    }

    fn user_scans_dir(&self, user_id: &str) -> RepairResult<PathBuf> {
        Ok(self.root.join("scans").join(checked_id(user_id)?))
    }

    fn scan_path(&self, user_id: &str, scan_id: &str) -> RepairResult<PathBuf> {
        Ok(self.user_scans_dir(user_id)?.join(format!("{}.json", checked_id(scan_id)?)))
    }

    async fn write_scan(&self, scan: &ScanResult) -> RepairResult<()> {
        let path = self.scan_path(&scan.user_id, &scan.id)?;
        write_json(&path, scan).await
    }
}

#[async_trait]
impl ScanStore for FileStore {
    async fn create_scan(&self, scan: &ScanResult) -> RepairResult<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.scan_path(&scan.user_id, &scan.id)?;
        if fs::try_exists(&path).await? {
            return Err(RepairError::storage(format!("scan '{}' already exists", scan.id)));
        }
        write_json(&path, scan).await
    }

    async fn save_scan(&self, scan: &ScanResult) -> RepairResult<()> {
        let _guard = self.write_lock.lock().await;
        self.write_scan(scan).await
    }

    async fn get_scan(&self, user_id: &str, scan_id: &str) -> RepairResult<ScanResult> {
        let path = self.scan_path(user_id, scan_id)?;
        read_json(&path).await?.ok_or_else(|| RepairError::not_found("scan", scan_id))
    }

    async fn list_scans(&self, user_id: &str) -> RepairResult<Vec<ScanResult>> {
        let dir = self.user_scans_dir(user_id)?;
        if !fs::try_exists(&dir).await? {
            return Ok(Vec::new());
        }

        let mut scans = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_json::<ScanResult>(&path).await {
                Ok(Some(scan)) => scans.push(scan),
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable scan file {}: {}", path.display(), e),
            }
        }

        newest_first(&mut scans);
        Ok(scans)
    }

    async fn update_issue(
        &self,
        user_id: &str,
        scan_id: &str,
        issue: &Issue,
        expected: IssueStatus,
    ) -> RepairResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut scan = self.get_scan(user_id, scan_id).await?;
        replace_issue(&mut scan, issue, expected)?;
        self.write_scan(&scan).await
    }
}

#[async_trait]
impl UserStore for FileStore {
    async fn get_user(&self, user_id: &str) -> RepairResult<User> {
        let path = self.user_path(user_id)?;
        read_json(&path).await?.ok_or_else(|| RepairError::not_found("user", user_id))
    }

    async fn save_user(&self, user: &User) -> RepairResult<()> {
        let _guard = self.write_lock.lock().await;
        write_json(&self.user_path(&user.id)?, user).await
    }

    async fn increment_usage(&self, user_id: &str, kind: QuotaKind) -> RepairResult<Usage> {
        let _guard = self.write_lock.lock().await;
        let mut user = self.get_user(user_id).await?;
        bump(&mut user.usage, kind);
        write_json(&self.user_path(user_id)?, &user).await?;
        Ok(user.usage)
    }
}

/// Ids become file names, so separators and dot-only names are rejected
fn checked_id(id: &str) -> RepairResult<&str> {
    let valid = !id.is_empty()
        && !id.chars().all(|c| c == '.')
        && !id.contains(['/', '\\', '\0']);
    if valid {
        Ok(id)
    } else {
        Err(RepairError::storage(format!("invalid record id '{}'", id)))
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> RepairResult<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> RepairResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let content = serde_json::to_string_pretty(value)?;

    // Write beside the target then rename so readers never see a torn file
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content).await?;
    fs::rename(&tmp, path).await?;
    debug!("Wrote {}", path.display());
    Ok(())
}
