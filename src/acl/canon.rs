//! Canonicalization and hashing (§4.2.1).

use super::{AclEntry, Permission, PrincipalType};
use sha2::{Digest, Sha256};

/// A canonicalized, deduplicated, sorted entry set with its stable
/// serialization and hash. `entries.is_empty()` is the "public" /
/// NULL-`acl_id` sentinel from §4.2.1 step 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalAcl {
    pub entries: Vec<AclEntry>,
    pub serialized: String,
    pub hash: String,
}

fn principal_type_key(t: PrincipalType) -> &'static str {
    match t {
        PrincipalType::User => "user",
        PrincipalType::Group => "group",
    }
}

fn permission_key(p: Permission) -> &'static str {
    match p {
        Permission::Read => "read",
        Permission::Write => "write",
    }
}

/// §4.2.1: dedup exact `(principal_type, principal_id, permission)`
/// triples, sort lexicographically, serialize as newline-joined
/// `type|id|perm` triples, then SHA-256 the result.
pub fn canonicalize(entries: &[AclEntry]) -> CanonicalAcl {
    let mut deduped: Vec<AclEntry> = Vec::with_capacity(entries.len());
    for e in entries {
        if !deduped.contains(e) {
            deduped.push(e.clone());
        }
    }
    deduped.sort_by(|a, b| {
        (
            principal_type_key(a.principal_type),
            a.principal_id,
            permission_key(a.permission),
        )
            .cmp(&(
                principal_type_key(b.principal_type),
                b.principal_id,
                permission_key(b.permission),
            ))
    });

    let serialized = deduped
        .iter()
        .map(|e| {
            format!(
                "{}|{}|{}",
                principal_type_key(e.principal_type),
                e.principal_id,
                permission_key(e.permission)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let hash = hex_sha256(serialized.as_bytes());

    CanonicalAcl {
        entries: deduped,
        serialized,
        hash,
    }
}

fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn empty_is_public_sentinel() {
        let c = canonicalize(&[]);
        assert!(c.entries.is_empty());
        assert_eq!(c.serialized, "");
    }

    #[test]
    fn dedups_exact_duplicates() {
        let u = Uuid::new_v4();
        let entries = vec![
            AclEntry::user(u, Permission::Read),
            AclEntry::user(u, Permission::Read),
        ];
        assert_eq!(canonicalize(&entries).entries.len(), 1);
    }

    #[test]
    fn order_independent_hash() {
        let u = Uuid::new_v4();
        let v = Uuid::new_v4();
        let a = vec![
            AclEntry::user(u, Permission::Read),
            AclEntry::user(v, Permission::Write),
        ];
        let b = vec![
            AclEntry::user(v, Permission::Write),
            AclEntry::user(u, Permission::Read),
        ];
        assert_eq!(canonicalize(&a).hash, canonicalize(&b).hash);
    }

    #[test]
    fn distinct_entries_hash_differently() {
        let u = Uuid::new_v4();
        let a = vec![AclEntry::user(u, Permission::Read)];
        let b = vec![AclEntry::user(u, Permission::Write)];
        assert_ne!(canonicalize(&a).hash, canonicalize(&b).hash);
    }
}
