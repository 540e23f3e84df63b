//! Index management.
//!
//! Graph indexes are declared once here and created before any bulk load so
//! MERGE/MATCH lookups by id stay fast. Creation is always idempotent.

use serde::{Deserialize, Serialize};

/// Type of index to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexType {
    /// B-tree index for equality lookups.
    BTree,
    /// Unique constraint (implies B-tree).
    Unique,
    /// B-tree index on a relationship property; `label` is the relationship type.
    Relationship,
}

/// One label+property index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexSpec {
    pub label: String,
    pub property: String,
    pub kind: IndexType,
}

impl IndexSpec {
    pub fn unique(label: &str, property: &str) -> Self {
        Self { label: label.into(), property: property.into(), kind: IndexType::Unique }
    }

    pub fn btree(label: &str, property: &str) -> Self {
        Self { label: label.into(), property: property.into(), kind: IndexType::BTree }
    }

    pub fn relationship(rel_type: &str, property: &str) -> Self {
        Self { label: rel_type.into(), property: property.into(), kind: IndexType::Relationship }
    }

    /// Stable name, e.g. `bond_id_unique`.
    pub fn name(&self) -> String {
        let suffix = match self.kind {
            IndexType::Unique => "unique",
            IndexType::BTree | IndexType::Relationship => "idx",
        };
        format!("{}_{}_{}", self.label.to_lowercase(), self.property, suffix)
    }

    /// `CREATE ... IF NOT EXISTS` statement for this index.
    pub fn to_cypher(&self) -> String {
        match self.kind {
            IndexType::Unique => format!(
                "CREATE CONSTRAINT {} IF NOT EXISTS FOR (n:{}) REQUIRE n.{} IS UNIQUE",
                self.name(),
                self.label,
                self.property
            ),
            IndexType::BTree => format!(
                "CREATE INDEX {} IF NOT EXISTS FOR (n:{}) ON (n.{})",
                self.name(),
                self.label,
                self.property
            ),
            IndexType::Relationship => format!(
                "CREATE INDEX {} IF NOT EXISTS FOR ()-[r:{}]-() ON (r.{})",
                self.name(),
                self.label,
                self.property
            ),
        }
    }
}

/// Indexes every import creates before loading.
pub fn corpus_indexes() -> Vec<IndexSpec> {
    vec![
        IndexSpec::unique("Bond", "id"),
        IndexSpec::unique("Book", "id"),
        IndexSpec::btree("Bond", "adj"),
        IndexSpec::btree("Bond", "noun"),
        IndexSpec::btree("Author", "name"),
        IndexSpec::relationship("FOLLOWS", "book_id"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cypher_is_idempotent_ddl() {
        for spec in corpus_indexes() {
            assert!(spec.to_cypher().contains("IF NOT EXISTS"), "{}", spec.to_cypher());
        }
    }

    #[test]
    fn test_unique_constraint_statement() {
        assert_eq!(
            IndexSpec::unique("Bond", "id").to_cypher(),
            "CREATE CONSTRAINT bond_id_unique IF NOT EXISTS FOR (n:Bond) REQUIRE n.id IS UNIQUE"
        );
    }

    #[test]
    fn test_follows_book_index_for_derivation() {
        let spec = IndexSpec::relationship("FOLLOWS", "book_id");
        assert!(corpus_indexes().contains(&spec));
        assert_eq!(
            spec.to_cypher(),
            "CREATE INDEX follows_book_id_idx IF NOT EXISTS FOR ()-[r:FOLLOWS]-() ON (r.book_id)"
        );
    }
}
