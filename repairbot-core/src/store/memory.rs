use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{ScanStore, UserStore, bump, newest_first, replace_issue};
use crate::error::{QuotaKind, RepairError, RepairResult};
use crate::models::{Issue, IssueStatus, ScanResult, Usage, User};

/// In-process store for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryStore {
    scans: RwLock<HashMap<String, ScanResult>>,
    users: RwLock<HashMap<String, User>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with users
    pub fn with_users(users: impl IntoIterator<Item = User>) -> Self {
        let users = users.into_iter().map(|u| (u.id.clone(), u)).collect();
        Self {
            scans: RwLock::default(),
            users: RwLock::new(users),
        }
    }

    /// Number of scans across all users
    pub async fn scan_count(&self) -> usize {
        self.scans.read().await.len()
    }
}

#[async_trait]
impl ScanStore for MemoryStore {
    async fn create_scan(&self, scan: &ScanResult) -> RepairResult<()> {
        let mut scans = self.scans.write().await;
        if scans.contains_key(&scan.id) {
            return Err(RepairError::storage(format!("scan '{}' already exists", scan.id)));
        }
        scans.insert(scan.id.clone(), scan.clone());
        Ok(())
    }

    async fn save_scan(&self, scan: &ScanResult) -> RepairResult<()> {
        self.scans.write().await.insert(scan.id.clone(), scan.clone());
        Ok(())
    }

    async fn get_scan(&self, user_id: &str, scan_id: &str) -> RepairResult<ScanResult> {
        self.scans
            .read()
            .await
            .get(scan_id)
            .filter(|scan| scan.user_id == user_id)
            .cloned()
            .ok_or_else(|| RepairError::not_found("scan", scan_id))
    }

    async fn list_scans(&self, user_id: &str) -> RepairResult<Vec<ScanResult>> {
        let mut scans: Vec<ScanResult> = self
            .scans
            .read()
            .await
            .values()
            .filter(|scan| scan.user_id == user_id)
            .cloned()
            .collect();
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
        let mut scans = self.scans.write().await;
        let scan = scans
            .get_mut(scan_id)
            .filter(|scan| scan.user_id == user_id)
            .ok_or_else(|| RepairError::not_found("scan", scan_id))?;
        replace_issue(scan, issue, expected)
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn get_user(&self, user_id: &str) -> RepairResult<User> {
        self.users
            .read()
            .await
            .get(user_id)
            .cloned()
            .ok_or_else(|| RepairError::not_found("user", user_id))
    }

    async fn save_user(&self, user: &User) -> RepairResult<()> {
        self.users.write().await.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn increment_usage(&self, user_id: &str, kind: QuotaKind) -> RepairResult<Usage> {
        let mut users = self.users.write().await;
        let user = users.get_mut(user_id).ok_or_else(|| RepairError::not_found("user", user_id))?;
        bump(&mut user.usage, kind);
        Ok(user.usage.clone())
    }
}
