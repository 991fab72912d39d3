use serde_json::Value;

use kora_canonical::to_canonical_bytes;
use kora_core::error::KoraRentError;
use kora_crypto::{sha256_concat, verify_detached};

/// Verify an attestation document with nothing but the document itself.
///
/// Works on the parsed JSON value, not a typed struct: the hash must be
/// recomputed over exactly what the file says, unknown fields included.
///
/// Checks, in order:
///   1. recompute H_att from the embedded manifest, db_state_hash, and
///      result_digest; compare to `attestation_hash`
///   2. `manifest.db_state_hash` equals the top-level `db_state_hash`
///   3. if both `signature` and `manifest.operator_pubkey` are present,
///      verify the detached Ed25519 signature over the raw H_att bytes
pub fn verify_document(doc: &Value) -> Result<(), KoraRentError> {
    let manifest = doc
        .get("manifest")
        .filter(|m| m.is_object())
        .ok_or_else(|| KoraRentError::InvalidDocument("missing manifest".into()))?;
    let result_digest = doc
        .get("result_digest")
        .filter(|d| d.is_object())
        .ok_or_else(|| KoraRentError::InvalidDocument("missing result_digest".into()))?;
    let db_state_hash_hex = doc["db_state_hash"]
        .as_str()
        .ok_or_else(|| KoraRentError::InvalidDocument("missing db_state_hash".into()))?;
    let claimed_hash = doc["attestation_hash"]
        .as_str()
        .ok_or_else(|| KoraRentError::InvalidDocument("missing attestation_hash".into()))?;

    let db_raw = hex::decode(db_state_hash_hex)
        .map_err(|e| KoraRentError::InvalidDocument(format!("db_state_hash hex: {e}")))?;
    if db_raw.len() != 32 {
        return Err(KoraRentError::InvalidDocument(format!(
            "db_state_hash is {} bytes, expected 32",
            db_raw.len()
        )));
    }

    let h_att = sha256_concat(&[
        &to_canonical_bytes(manifest)?,
        &db_raw,
        &to_canonical_bytes(result_digest)?,
    ]);
    let actual_hash = hex::encode(h_att);
    if actual_hash != claimed_hash {
        return Err(KoraRentError::AttestationMismatch {
            field: "attestation_hash",
            expected: claimed_hash.to_string(),
            actual: actual_hash,
        });
    }

    let manifest_db_hash = manifest["db_state_hash"].as_str().unwrap_or_default();
    if manifest_db_hash != db_state_hash_hex {
        return Err(KoraRentError::AttestationMismatch {
            field: "db_state_hash",
            expected: db_state_hash_hex.to_string(),
            actual: manifest_db_hash.to_string(),
        });
    }

    if let (Some(signature), Some(operator)) = (
        doc["signature"].as_str(),
        manifest["operator_pubkey"].as_str(),
    ) {
        verify_detached(operator, &h_att, signature)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejects_structurally_broken_documents() {
        assert!(verify_document(&json!({})).is_err());
        assert!(verify_document(&json!({
            "manifest": {},
            "result_digest": {},
            "db_state_hash": "zz",
            "attestation_hash": "00",
        }))
        .is_err());
        assert!(verify_document(&json!({
            "manifest": {},
            "result_digest": {},
            "db_state_hash": "00",
            "attestation_hash": "00",
        }))
        .is_err());
    }

    #[test]
    fn hash_mismatch_reports_expected_and_actual() {
        let doc = json!({
            "manifest": {"db_state_hash": format!("{:064}", 0)},
            "result_digest": {},
            "db_state_hash": format!("{:064}", 0),
            "attestation_hash": format!("{:064}", 0),
        });
        match verify_document(&doc).unwrap_err() {
            KoraRentError::AttestationMismatch {
                field,
                expected,
                actual,
            } => {
                assert_eq!(field, "attestation_hash");
                assert_eq!(expected, format!("{:064}", 0));
                assert_ne!(actual, expected);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
