//! Account CRUD and health-field writes.

use rusqlite::{OptionalExtension, Row, params};
use sendhive_core::error::{Result, SendHiveError};
use sendhive_core::types::{
    Account, AccountConfig, AccountStatus, ConnectionQuality, HealthSnapshot, Platform,
    RuntimeDescriptor, RuntimeStatus,
};

use crate::{StoreDb, parse_ts, ts};

const ACCOUNT_COLS: &str = "id, owner_id, platform, status, config_json, last_heartbeat, \
     consecutive_errors, quality, runtime_json, created_at, updated_at";

fn row_to_account(row: &Row<'_>) -> rusqlite::Result<Account> {
    let platform: String = row.get(2)?;
    let status: String = row.get(3)?;
    let config_json: String = row.get(4)?;
    let last_heartbeat: Option<String> = row.get(5)?;
    let quality: String = row.get(7)?;
    let runtime_json: Option<String> = row.get(8)?;
    let created_at: String = row.get(9)?;
    let updated_at: String = row.get(10)?;

    Ok(Account {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        platform: Platform::from_slug(&platform).unwrap_or(Platform::Whatsapp),
        status: AccountStatus::from_slug(&status),
        config: serde_json::from_str(&config_json).unwrap_or_default(),
        health: HealthSnapshot {
            last_heartbeat: last_heartbeat.as_deref().and_then(parse_ts),
            consecutive_errors: row.get(6)?,
            quality: ConnectionQuality::from_slug(&quality),
        },
        runtime: runtime_json
            .as_deref()
            .and_then(|j| serde_json::from_str::<RuntimeDescriptor>(j).ok()),
        created_at: parse_ts(&created_at).unwrap_or_default(),
        updated_at: parse_ts(&updated_at).unwrap_or_default(),
    })
}

impl StoreDb {
    /// Persist a new account. Fails if the id already exists.
    pub fn insert_account(&self, account: &Account) -> Result<()> {
        let conn = self.lock()?;
        let config_json = serde_json::to_string(&account.config)
            .map_err(|e| SendHiveError::store(format!("Serialize config: {e}")))?;
        conn.execute(
            "INSERT INTO accounts (id, owner_id, platform, status, config_json, \
             consecutive_errors, quality, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                account.id,
                account.owner_id,
                account.platform.as_str(),
                account.status.as_str(),
                config_json,
                account.health.consecutive_errors,
                account.health.quality.as_str(),
                ts(account.created_at),
                ts(account.updated_at),
            ],
        )
        .map_err(|e| SendHiveError::store(format!("Insert account: {e}")))?;
        Ok(())
    }

    /// Fetch one account, `None` when absent.
    pub fn get_account(&self, id: &str) -> Result<Option<Account>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {ACCOUNT_COLS} FROM accounts WHERE id=?1"),
            params![id],
            row_to_account,
        )
        .optional()
        .map_err(|e| SendHiveError::store(format!("Get account: {e}")))
    }

    /// List all accounts.
    pub fn list_accounts(&self) -> Result<Vec<Account>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {ACCOUNT_COLS} FROM accounts ORDER BY created_at"
            ))
            .map_err(|e| SendHiveError::store(format!("Prepare: {e}")))?;
        let accounts = stmt
            .query_map([], row_to_account)
            .map_err(|e| SendHiveError::store(format!("Query: {e}")))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(accounts)
    }

    /// List accounts currently in one of the given statuses.
    pub fn list_accounts_by_status(&self, statuses: &[AccountStatus]) -> Result<Vec<Account>> {
        Ok(self
            .list_accounts()?
            .into_iter()
            .filter(|a| statuses.contains(&a.status))
            .collect())
    }

    /// Unconditional status write (used for terminal/external transitions).
    pub fn update_account_status(&self, id: &str, status: AccountStatus) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE accounts SET status=?1, updated_at=?2 WHERE id=?3",
            params![status.as_str(), ts(chrono::Utc::now()), id],
        )
        .map_err(|e| SendHiveError::store(format!("Update status: {e}")))?;
        Ok(())
    }

    /// Conditional status transition — only applies when the current status
    /// is `from`. Returns whether a row changed, so racing writers can tell
    /// who won.
    pub fn update_account_status_if(
        &self,
        id: &str,
        from: AccountStatus,
        to: AccountStatus,
    ) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE accounts SET status=?1, updated_at=?2 WHERE id=?3 AND status=?4",
                params![to.as_str(), ts(chrono::Utc::now()), id, from.as_str()],
            )
            .map_err(|e| SendHiveError::store(format!("Update status: {e}")))?;
        Ok(changed > 0)
    }

    /// Replace the durable account config.
    pub fn update_account_config(&self, id: &str, config: &AccountConfig) -> Result<()> {
        let conn = self.lock()?;
        let config_json = serde_json::to_string(config)
            .map_err(|e| SendHiveError::store(format!("Serialize config: {e}")))?;
        conn.execute(
            "UPDATE accounts SET config_json=?1, updated_at=?2 WHERE id=?3",
            params![config_json, ts(chrono::Utc::now()), id],
        )
        .map_err(|e| SendHiveError::store(format!("Update config: {e}")))?;
        Ok(())
    }

    /// Record (or clear) the runtime descriptor.
    pub fn set_account_runtime(&self, id: &str, runtime: Option<&RuntimeDescriptor>) -> Result<()> {
        let conn = self.lock()?;
        let runtime_json = match runtime {
            Some(r) => Some(
                serde_json::to_string(r)
                    .map_err(|e| SendHiveError::store(format!("Serialize runtime: {e}")))?,
            ),
            None => None,
        };
        conn.execute(
            "UPDATE accounts SET runtime_json=?1, updated_at=?2 WHERE id=?3",
            params![runtime_json, ts(chrono::Utc::now()), id],
        )
        .map_err(|e| SendHiveError::store(format!("Set runtime: {e}")))?;
        Ok(())
    }

    /// Heartbeat push: refresh the timestamp and reset the error streak.
    pub fn record_heartbeat(&self, id: &str, at: chrono::DateTime<chrono::Utc>) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE accounts SET last_heartbeat=?1, consecutive_errors=0, updated_at=?2 \
             WHERE id=?3",
            params![ts(at), ts(chrono::Utc::now()), id],
        )
        .map_err(|e| SendHiveError::store(format!("Record heartbeat: {e}")))?;
        Ok(())
    }

    /// Atomically bump the consecutive error counter, returning the new value.
    pub fn bump_consecutive_errors(&self, id: &str) -> Result<u32> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE accounts SET consecutive_errors = consecutive_errors + 1, updated_at=?1 \
             WHERE id=?2",
            params![ts(chrono::Utc::now()), id],
        )
        .map_err(|e| SendHiveError::store(format!("Bump errors: {e}")))?;
        conn.query_row(
            "SELECT consecutive_errors FROM accounts WHERE id=?1",
            params![id],
            |row| row.get(0),
        )
        .map_err(|e| SendHiveError::store(format!("Read errors: {e}")))
    }

    /// Write the observed connection quality tier.
    pub fn set_account_quality(&self, id: &str, quality: ConnectionQuality) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE accounts SET quality=?1, updated_at=?2 WHERE id=?3",
            params![quality.as_str(), ts(chrono::Utc::now()), id],
        )
        .map_err(|e| SendHiveError::store(format!("Set quality: {e}")))?;
        Ok(())
    }

    /// Persist the last process-level status seen by the monitor.
    pub fn set_observed_runtime(&self, id: &str, status: RuntimeStatus) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE accounts SET observed_runtime=?1, updated_at=?2 WHERE id=?3",
            params![status.as_str(), ts(chrono::Utc::now()), id],
        )
        .map_err(|e| SendHiveError::store(format!("Set observed runtime: {e}")))?;
        Ok(())
    }

    /// Reset the error streak (explicit stop keeps the last heartbeat).
    pub fn clear_account_errors(&self, id: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE accounts SET consecutive_errors=0, updated_at=?1 WHERE id=?2",
            params![ts(chrono::Utc::now()), id],
        )
        .map_err(|e| SendHiveError::store(format!("Clear errors: {e}")))?;
        Ok(())
    }

    /// Purge the durable record.
    pub fn delete_account(&self, id: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM accounts WHERE id=?1", params![id])
            .map_err(|e| SendHiveError::store(format!("Delete account: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sendhive_core::types::AccountConfigPatch;

    fn sample_account() -> Account {
        Account::new("owner-1", Platform::Whatsapp, AccountConfig::default())
    }

    #[test]
    fn test_account_crud() {
        let db = StoreDb::in_memory().unwrap();
        let acc = sample_account();
        db.insert_account(&acc).unwrap();

        let loaded = db.get_account(&acc.id).unwrap().unwrap();
        assert_eq!(loaded.id, acc.id);
        assert_eq!(loaded.platform, Platform::Whatsapp);
        assert_eq!(loaded.status, AccountStatus::Pending);

        db.delete_account(&acc.id).unwrap();
        assert!(db.get_account(&acc.id).unwrap().is_none());
    }

    #[test]
    fn test_missing_account_is_none() {
        let db = StoreDb::in_memory().unwrap();
        assert!(db.get_account("acc-ghost").unwrap().is_none());
    }

    #[test]
    fn test_conditional_status_write() {
        let db = StoreDb::in_memory().unwrap();
        let acc = sample_account();
        db.insert_account(&acc).unwrap();

        // pending → provisioning applies
        assert!(
            db.update_account_status_if(&acc.id, AccountStatus::Pending, AccountStatus::Provisioning)
                .unwrap()
        );
        // a second writer expecting pending loses the race
        assert!(
            !db.update_account_status_if(&acc.id, AccountStatus::Pending, AccountStatus::Provisioning)
                .unwrap()
        );
        let loaded = db.get_account(&acc.id).unwrap().unwrap();
        assert_eq!(loaded.status, AccountStatus::Provisioning);
    }

    #[test]
    fn test_heartbeat_resets_error_streak() {
        let db = StoreDb::in_memory().unwrap();
        let acc = sample_account();
        db.insert_account(&acc).unwrap();

        assert_eq!(db.bump_consecutive_errors(&acc.id).unwrap(), 1);
        assert_eq!(db.bump_consecutive_errors(&acc.id).unwrap(), 2);

        db.record_heartbeat(&acc.id, chrono::Utc::now()).unwrap();
        let loaded = db.get_account(&acc.id).unwrap().unwrap();
        assert_eq!(loaded.health.consecutive_errors, 0);
        assert!(loaded.health.last_heartbeat.is_some());
    }

    #[test]
    fn test_runtime_descriptor_roundtrip() {
        let db = StoreDb::in_memory().unwrap();
        let acc = sample_account();
        db.insert_account(&acc).unwrap();

        let desc = RuntimeDescriptor {
            handle_id: "proc-1".into(),
            port: 10101,
            created_at: chrono::Utc::now(),
        };
        db.set_account_runtime(&acc.id, Some(&desc)).unwrap();
        let loaded = db.get_account(&acc.id).unwrap().unwrap();
        assert_eq!(loaded.runtime.as_ref().unwrap().port, 10101);

        db.set_account_runtime(&acc.id, None).unwrap();
        let loaded = db.get_account(&acc.id).unwrap().unwrap();
        assert!(loaded.runtime.is_none());
    }

    #[test]
    fn test_config_update() {
        let db = StoreDb::in_memory().unwrap();
        let acc = sample_account();
        db.insert_account(&acc).unwrap();

        let patch = AccountConfigPatch {
            enabled: Some(false),
            ..Default::default()
        };
        let merged = acc.config.merged(&patch);
        db.update_account_config(&acc.id, &merged).unwrap();

        let loaded = db.get_account(&acc.id).unwrap().unwrap();
        assert!(!loaded.config.enabled);
    }

    #[test]
    fn test_list_by_status() {
        let db = StoreDb::in_memory().unwrap();
        let a = sample_account();
        let b = sample_account();
        db.insert_account(&a).unwrap();
        db.insert_account(&b).unwrap();
        db.update_account_status(&b.id, AccountStatus::Connected)
            .unwrap();

        let connected = db
            .list_accounts_by_status(&[AccountStatus::Connected])
            .unwrap();
        assert_eq!(connected.len(), 1);
        assert_eq!(connected[0].id, b.id);
    }
}
