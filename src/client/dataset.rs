//! Flat-file dataset names and where to find them.

use std::path::{Path, PathBuf};

use crate::codec::DecodeMode;

/// One flat-file intermediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Dataset {
    Books,
    Bonds,
    Follows,
    WordCoordinates,
    CoordinatesJson,
    BondVocab,
    LearnedBonds,
}

impl Dataset {
    /// Name this tool writes.
    pub fn file_name(self) -> &'static str {
        match self {
            Dataset::Books => "books.csv",
            Dataset::Bonds => "bonds.csv",
            Dataset::Follows => "follows.csv",
            Dataset::WordCoordinates => "word_coordinates.csv",
            Dataset::CoordinatesJson => "coordinates.json",
            Dataset::BondVocab => "hyp_bond_vocab.csv",
            Dataset::LearnedBonds => "learned_bonds.csv",
        }
    }

    /// Names used by earlier producers, relative to the data directory.
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            Dataset::Books => &["neo4j_books.csv"],
            Dataset::Bonds => &["neo4j_bonds.csv"],
            Dataset::Follows => &["neo4j_follows.csv"],
            Dataset::WordCoordinates => &["pg_word_coordinates.csv"],
            Dataset::CoordinatesJson => {
                &["derived_coordinates.json", "../coordinates/derived_coordinates.json"]
            }
            Dataset::BondVocab => &["pg_hyp_bond_vocab.csv", "../backup/hyp_bond_vocab.csv"],
            Dataset::LearnedBonds => &["pg_learned_bonds.csv", "../backup/learned_bonds.csv"],
        }
    }

    pub fn path_in(self, dir: &Path) -> PathBuf {
        dir.join(self.file_name())
    }

    /// First existing file for this dataset. Files under the canonical name
    /// decode strictly, alias files tolerantly.
    pub fn locate(self, dir: &Path, force_tolerant: bool) -> Option<Located> {
        let canonical = self.path_in(dir);
        if canonical.is_file() {
            let mode = if force_tolerant { DecodeMode::Tolerant } else { DecodeMode::Strict };
            return Some(Located { path: canonical, mode });
        }
        self.aliases()
            .iter()
            .map(|alias| dir.join(alias))
            .find(|path| path.is_file())
            .map(|path| Located { path, mode: DecodeMode::Tolerant })
    }
}

impl std::fmt::Display for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.file_name())
    }
}

/// A dataset file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    pub path: PathBuf,
    pub mode: DecodeMode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_name_is_strict() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bonds.csv"), "id,adj,noun,A,S,tau,source\n").unwrap();
        std::fs::write(dir.path().join("neo4j_bonds.csv"), "").unwrap();

        let found = Dataset::Bonds.locate(dir.path(), false).unwrap();
        assert_eq!(found.path, dir.path().join("bonds.csv"));
        assert_eq!(found.mode, DecodeMode::Strict);

        let forced = Dataset::Bonds.locate(dir.path(), true).unwrap();
        assert_eq!(forced.mode, DecodeMode::Tolerant);
    }

    #[test]
    fn test_alias_is_tolerant() {
        let root = tempfile::tempdir().unwrap();
        let data = root.path().join("migration");
        std::fs::create_dir_all(root.path().join("backup")).unwrap();
        std::fs::create_dir_all(&data).unwrap();
        std::fs::write(root.path().join("backup/hyp_bond_vocab.csv"), "").unwrap();

        let found = Dataset::BondVocab.locate(&data, false).unwrap();
        assert!(found.path.ends_with("backup/hyp_bond_vocab.csv"));
        assert_eq!(found.mode, DecodeMode::Tolerant);
    }

    #[test]
    fn test_missing_dataset() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Dataset::Follows.locate(dir.path(), false), None);
    }
}
