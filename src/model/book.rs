//! Books, authors, and the derived CONTAINS relation.

use serde::{Deserialize, Serialize};

/// One corpus source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookNode {
    pub id: String,
    pub title: String,
    pub author: String,
    pub filename: String,
    pub genre: String,
}

impl BookNode {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            author: String::new(),
            filename: String::new(),
            genre: String::new(),
        }
    }

    pub fn by(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    pub fn with_genre(mut self, genre: impl Into<String>) -> Self {
        self.genre = genre.into();
        self
    }

    /// The author node this book hangs off, if the row names one.
    pub fn author_node(&self) -> Option<AuthorNode> {
        let name = self.author.trim();
        (!name.is_empty()).then(|| AuthorNode { name: name.to_string() })
    }
}

/// Connected to its books by WROTE.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AuthorNode {
    pub name: String,
}

/// Derived book → bond containment. Never authoritative; recomputed from FOLLOWS.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContainsEdge {
    pub book_id: String,
    pub bond_id: String,
}

impl ContainsEdge {
    pub fn new(book_id: impl Into<String>, bond_id: impl Into<String>) -> Self {
        Self { book_id: book_id.into(), bond_id: bond_id.into() }
    }
}

/// A book with the number of bonds it contains (verification sample).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSample {
    pub id: String,
    pub title: String,
    pub author: String,
    pub bonds: u64,
}

impl std::fmt::Display for BookSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {} bonds", self.title, self.author, self.bonds)
    }
}
