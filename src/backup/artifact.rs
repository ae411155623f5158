// Reading stored artifacts back into verified plaintext

use super::types::BackupRecord;
use super::{codec, crypto};
use crate::catalog::Catalog;
use crate::storage::StorageBackend;
use crate::{BackupError, Result};

/// Passphrase for an encrypted record, taken from its configuration
pub fn passphrase_for(catalog: &Catalog, record: &BackupRecord) -> Option<String> {
    if !record.metadata.encrypted {
        return None;
    }
    catalog
        .config(&record.config_id)
        .ok()
        .and_then(|config| config.storage.encryption_key)
}

/// Fetch an artifact and undo encryption and compression.
///
/// The result is the canonical plaintext; it is not checksummed here.
pub async fn load_plaintext(
    storage: &dyn StorageBackend,
    record: &BackupRecord,
    passphrase: Option<&str>,
) -> Result<Vec<u8>> {
    let mut bytes = storage.get(&record.storage_location).await?;

    if record.metadata.encrypted {
        let passphrase = passphrase
            .ok_or_else(|| BackupError::Decryption("no encryption key available".to_string()))?
            .to_string();
        bytes = tokio::task::spawn_blocking(move || crypto::decrypt(&bytes, &passphrase))
            .await
            .map_err(|e| BackupError::Pipeline(format!("Decryption task failed: {}", e)))??;
    }

    if record.metadata.compressed {
        bytes = codec::decompress(&bytes)?;
    }

    Ok(bytes)
}

/// Compare the plaintext against the checksum recorded at backup time
pub fn check_integrity(record: &BackupRecord, plaintext: &[u8]) -> Result<()> {
    let actual = codec::checksum(plaintext);
    if actual != record.checksum {
        return Err(BackupError::IntegrityCheckFailed {
            expected: record.checksum.clone(),
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::running_record;
    use crate::storage::MemoryStorage;

    #[tokio::test]
    async fn test_plain_artifact_round_trip() {
        let storage = MemoryStorage::new();
        let plaintext = br#"{"metadata":{}}"#.to_vec();
        let mut record = running_record("b1", "c1", 0);
        record.checksum = codec::checksum(&plaintext);
        record.metadata.compressed = true;
        record.storage_location = storage
            .put("b1.backup", codec::compress(&plaintext, 6).unwrap())
            .await
            .unwrap();

        let loaded = load_plaintext(&storage, &record, None).await.unwrap();
        assert_eq!(loaded, plaintext);
        assert!(check_integrity(&record, &loaded).is_ok());
    }

    #[tokio::test]
    async fn test_encrypted_without_key_fails() {
        let storage = MemoryStorage::new();
        let mut record = running_record("b1", "c1", 0);
        record.metadata.encrypted = true;
        record.storage_location = storage
            .put("b1.backup", crypto::encrypt(b"payload", "secret").unwrap())
            .await
            .unwrap();

        assert!(matches!(
            load_plaintext(&storage, &record, None).await,
            Err(BackupError::Decryption(_))
        ));
        assert_eq!(
            load_plaintext(&storage, &record, Some("secret")).await.unwrap(),
            b"payload".to_vec()
        );
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut record = running_record("b1", "c1", 0);
        record.checksum = codec::checksum(b"original");
        assert!(matches!(
            check_integrity(&record, b"tampered"),
            Err(BackupError::IntegrityCheckFailed { .. })
        ));
    }
}
