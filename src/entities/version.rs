// 🕰️ Transaction Version - immutable snapshot of a prior state
//
// Written before every update so the history view can list and restore
// earlier states. The checksum lets callers spot identical snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::Transaction;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionVersion {
    #[serde(default)]
    pub id: i64,
    pub transaction_id: i64,
    /// Version number of the snapshotted state
    pub version: i64,
    pub snapshot: Transaction,
    #[serde(default)]
    pub change_reason: Option<String>,
    /// SHA-256 over the serialized snapshot
    pub checksum: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl TransactionVersion {
    pub fn capture(tx: &Transaction, change_reason: Option<String>) -> Result<Self> {
        Ok(TransactionVersion {
            id: 0,
            transaction_id: tx.id,
            version: tx.version,
            checksum: snapshot_checksum(tx)?,
            snapshot: tx.clone(),
            change_reason,
            created_at: Utc::now(),
        })
    }

    /// True when the stored snapshot still hashes to its checksum
    pub fn verify(&self) -> bool {
        snapshot_checksum(&self.snapshot).map_or(false, |c| c == self.checksum)
    }
}

pub fn snapshot_checksum(tx: &Transaction) -> Result<String> {
    let bytes = serde_json::to_vec(tx)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_capture_and_verify() {
        let mut tx = Transaction::new_bill(1, "Vendor", NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        tx.id = 9;
        tx.version = 3;

        let v = TransactionVersion::capture(&tx, Some("edit".into())).unwrap();
        assert_eq!(v.transaction_id, 9);
        assert_eq!(v.version, 3);
        assert_eq!(v.checksum.len(), 64);
        assert!(v.verify());

        let mut tampered = v.clone();
        tampered.snapshot.total = 1.0;
        assert!(!tampered.verify());
    }
}
