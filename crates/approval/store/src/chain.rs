//! Hash linking for audit entries.
//!
//! Each entry's hash covers its content and its predecessor's hash, so a
//! rewritten or dropped entry breaks every link after it.

use crate::{StorageError, StorageResult};
use approval_types::{ApprovalId, AuditDraft, AuditEntry};

/// Turn a draft into a sequenced, hash-linked entry.
pub fn seal(
    draft: AuditDraft,
    approval_id: &ApprovalId,
    sequence: u64,
    previous_hash: Option<String>,
) -> StorageResult<AuditEntry> {
    let mut entry = draft.into_entry(approval_id.clone(), sequence, previous_hash, String::new());
    entry.hash = entry_hash(&entry)?;
    Ok(entry)
}

/// blake3 over the canonical JSON of everything but the hash itself.
pub fn entry_hash(entry: &AuditEntry) -> StorageResult<String> {
    let serialized = serde_json::to_vec(&entry.hash_material())
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(blake3::hash(&serialized).to_hex().to_string())
}

/// First broken link found by [`verify_chain`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainBreak {
    pub sequence: u64,
    pub reason: String,
}

impl std::fmt::Display for ChainBreak {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "entry {}: {}", self.sequence, self.reason)
    }
}

/// Check sequencing, back-links and hashes of one approval's entries,
/// given oldest-first.
pub fn verify_chain(entries: &[AuditEntry]) -> Result<(), ChainBreak> {
    let mut previous: Option<&AuditEntry> = None;

    for (index, entry) in entries.iter().enumerate() {
        let expected_sequence = index as u64 + 1;
        if entry.sequence != expected_sequence {
            return Err(ChainBreak {
                sequence: entry.sequence,
                reason: format!("expected sequence {}", expected_sequence),
            });
        }

        let expected_previous = previous.map(|p| p.hash.as_str());
        if entry.previous_hash.as_deref() != expected_previous {
            return Err(ChainBreak {
                sequence: entry.sequence,
                reason: "previous hash does not match predecessor".into(),
            });
        }

        let recomputed = entry_hash(entry).map_err(|e| ChainBreak {
            sequence: entry.sequence,
            reason: e.to_string(),
        })?;
        if recomputed != entry.hash {
            return Err(ChainBreak {
                sequence: entry.sequence,
                reason: "content hash mismatch".into(),
            });
        }

        previous = Some(entry);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approval_types::{ApprovalRequest, NewApproval, SlaPolicy, Transition};
    use chrono::Utc;

    fn sample_chain() -> Vec<AuditEntry> {
        let mut request = ApprovalRequest::create(
            NewApproval::new(["a", "b"], SlaPolicy::Uniform(60)),
            Utc::now(),
        )
        .unwrap();
        let created = seal(request.creation_draft(), &request.id, 1, None).unwrap();
        let draft = request
            .apply(&Transition::Escalate { manual: false }, Utc::now())
            .unwrap();
        let escalated = seal(draft, &request.id, 2, Some(created.hash.clone())).unwrap();
        vec![created, escalated]
    }

    #[test]
    fn intact_chain_verifies() {
        assert_eq!(verify_chain(&sample_chain()), Ok(()));
    }

    #[test]
    fn edited_entry_is_detected() {
        let mut entries = sample_chain();
        entries[1].actor = Some("mallory".into());
        let broken = verify_chain(&entries).unwrap_err();
        assert_eq!(broken.sequence, 2);
    }

    #[test]
    fn dropped_entry_is_detected() {
        let entries = sample_chain();
        let broken = verify_chain(&entries[1..]).unwrap_err();
        assert_eq!(broken.sequence, 2);
    }
}
