//! Migrations compiled into the binary

use sha2::{Digest, Sha256};

/// One embedded SQL migration
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub id: &'static str,
    pub sql: &'static str,
}

impl Migration {
    /// Hex SHA-256 of the SQL text, recorded when applied
    pub fn checksum(&self) -> String {
        hex::encode(Sha256::digest(self.sql.as_bytes()))
    }
}

/// Every migration, in application order
pub const MIGRATIONS: &[Migration] = &[Migration {
    id: "001_taxonomy",
    sql: include_str!("../../migrations/001_taxonomy.sql"),
}];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_ordered_and_unique() {
        let ids: Vec<&str> = MIGRATIONS.iter().map(|m| m.id).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_checksum_is_stable_hex() {
        let first = MIGRATIONS[0].checksum();
        assert_eq!(first.len(), 64);
        assert_eq!(first, MIGRATIONS[0].checksum());
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
