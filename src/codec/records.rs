//! Per-entity flat-file formats.

use csv::QuoteStyle;

use super::{fmt_datetime, fmt_float, CsvRecord, Row};
use crate::model::{
    bond_key, BondNode, BondVocabEntry, BookNode, FollowsEdge, LearnedBond, WordCoordinate,
    DEFAULT_AXIS, DEFAULT_SOURCE, DEFAULT_TAU, DEFAULT_WEIGHT,
};
use crate::Result;

// ============================================================================
// Graph entities
// ============================================================================

impl CsvRecord for BondNode {
    const HEADER: &'static [&'static str] = &["id", "adj", "noun", "A", "S", "tau", "source"];
    const QUOTE: QuoteStyle = QuoteStyle::Necessary;
    const LEGACY: &'static [&'static [&'static str]] = &[
        &["id", "adj", "noun", "A", "S", "tau", "source"],
        &["adj", "noun", "A", "S", "tau", "source"],
    ];

    fn encode(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.adj.clone(),
            self.noun.clone(),
            fmt_float(self.a),
            fmt_float(self.s),
            fmt_float(self.tau),
            self.source.clone(),
        ]
    }

    fn decode(row: &Row<'_>) -> Result<Self> {
        let adj = row.required("adj")?;
        let noun = row.required("noun")?;
        let id = row.opt_text("id").unwrap_or_else(|| bond_key(&adj, &noun));
        Ok(BondNode {
            id,
            adj,
            noun,
            a: row.float_or("A", DEFAULT_AXIS)?,
            s: row.float_or("S", DEFAULT_AXIS)?,
            tau: row.float_or("tau", DEFAULT_TAU)?,
            source: row.opt_text("source").unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
        })
    }
}

impl CsvRecord for FollowsEdge {
    const HEADER: &'static [&'static str] = &["from_id", "to_id", "source", "book_id"];
    const QUOTE: QuoteStyle = QuoteStyle::Necessary;
    const LEGACY: &'static [&'static [&'static str]] = &[
        &["from_id", "to_id", "weight", "source", "book_id"],
        &["from_id", "to_id", "weight", "source"],
    ];

    fn encode(&self) -> Vec<String> {
        vec![
            self.from_id.clone(),
            self.to_id.clone(),
            self.source.clone(),
            self.book_id.clone().unwrap_or_default(),
        ]
    }

    fn decode(row: &Row<'_>) -> Result<Self> {
        Ok(FollowsEdge {
            from_id: row.required("from_id")?,
            to_id: row.required("to_id")?,
            weight: row.float_or("weight", DEFAULT_WEIGHT)?,
            source: row.opt_text("source").unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            book_id: row.opt_text("book_id"),
        })
    }
}

impl CsvRecord for BookNode {
    const HEADER: &'static [&'static str] = &["id", "title", "author", "filename", "genre"];
    const QUOTE: QuoteStyle = QuoteStyle::Always;
    const LEGACY: &'static [&'static [&'static str]] = &[
        &["id", "title", "author", "filename", "genre"],
        &["author", "id", "title", "filename"],
    ];

    fn encode(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.title.clone(),
            self.author.clone(),
            self.filename.clone(),
            self.genre.clone(),
        ]
    }

    fn decode(row: &Row<'_>) -> Result<Self> {
        Ok(BookNode {
            id: row.required("id")?,
            title: row.text("title"),
            author: row.text("author"),
            filename: row.text("filename"),
            genre: row.text("genre"),
        })
    }
}

// ============================================================================
// Relational rows
// ============================================================================

impl CsvRecord for WordCoordinate {
    const HEADER: &'static [&'static str] = &["word", "A", "S", "tau", "source", "created_at"];
    const QUOTE: QuoteStyle = QuoteStyle::Necessary;
    const LEGACY: &'static [&'static [&'static str]] = &[
        &["word", "A", "S", "tau", "source", "created_at"],
        &["word", "A", "S", "tau", "source"],
    ];

    fn encode(&self) -> Vec<String> {
        vec![
            self.word.clone(),
            fmt_float(self.a),
            fmt_float(self.s),
            fmt_float(self.tau),
            self.source.clone(),
            fmt_datetime(self.created_at),
        ]
    }

    fn decode(row: &Row<'_>) -> Result<Self> {
        let word = row.required("word")?;
        let mut coord = WordCoordinate::new(
            &word,
            row.float_or("A", DEFAULT_AXIS)?,
            row.float_or("S", DEFAULT_AXIS)?,
            row.float_or("tau", DEFAULT_TAU)?,
            row.opt_text("source").unwrap_or_else(|| "csv".to_string()),
        );
        coord.created_at = row.opt_datetime("created_at")?;
        Ok(coord)
    }
}

impl CsvRecord for BondVocabEntry {
    const HEADER: &'static [&'static str] = &[
        "bond",
        "first_seen_order",
        "first_seen_book",
        "total_count",
        "book_count",
        "created_at",
    ];
    const QUOTE: QuoteStyle = QuoteStyle::Necessary;
    const LEGACY: &'static [&'static [&'static str]] = &[
        &["bond", "first_seen_order", "first_seen_book", "total_count", "book_count", "created_at"],
        &["bond", "first_seen_order", "first_seen_book", "total_count", "book_count"],
    ];

    fn encode(&self) -> Vec<String> {
        vec![
            self.bond.clone(),
            self.first_seen_order.map(|v| v.to_string()).unwrap_or_default(),
            self.first_seen_book.map(|v| v.to_string()).unwrap_or_default(),
            self.total_count.to_string(),
            self.book_count.to_string(),
            fmt_datetime(self.created_at),
        ]
    }

    fn decode(row: &Row<'_>) -> Result<Self> {
        Ok(BondVocabEntry {
            bond: row.required("bond")?,
            first_seen_order: row.opt_int("first_seen_order")?,
            first_seen_book: row.opt_uuid("first_seen_book"),
            total_count: row.int_or("total_count", 1)?,
            book_count: row.int_or("book_count", 1)?,
            created_at: row.opt_datetime("created_at")?,
        })
    }
}

impl CsvRecord for LearnedBond {
    const HEADER: &'static [&'static str] =
        &["adj", "noun", "A", "S", "tau", "source", "confidence", "use_count"];
    const QUOTE: QuoteStyle = QuoteStyle::Necessary;
    const LEGACY: &'static [&'static [&'static str]] =
        &[&["adj", "noun", "A", "S", "tau", "source", "confidence", "use_count"]];

    fn encode(&self) -> Vec<String> {
        vec![
            self.adj.clone(),
            self.noun.clone(),
            fmt_float(self.a),
            fmt_float(self.s),
            fmt_float(self.tau),
            self.source.clone(),
            fmt_float(self.confidence),
            self.use_count.to_string(),
        ]
    }

    fn decode(row: &Row<'_>) -> Result<Self> {
        let mut bond = LearnedBond::new(row.required("adj")?, row.required("noun")?);
        bond.a = row.float_or("A", DEFAULT_AXIS)?;
        bond.s = row.float_or("S", DEFAULT_AXIS)?;
        bond.tau = row.float_or("tau", DEFAULT_TAU)?;
        if let Some(source) = row.opt_text("source") {
            bond.source = source;
        }
        bond.confidence = row.float_or("confidence", 1.0)?;
        bond.use_count = row.int_or("use_count", 1)?;
        Ok(bond)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_line, encode_row, DecodeMode, RecordReader, RecordWriter};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_tolerant_bond_row() {
        let line = r#""adj1", "noun1", 0.5, -0.2, "2.5", "corpus""#;
        let bond: BondNode = decode_line(line, DecodeMode::Tolerant).unwrap();
        assert_eq!(bond.adj, "adj1");
        assert_eq!(bond.noun, "noun1");
        assert_eq!(bond.a, 0.5);
        assert_eq!(bond.s, -0.2);
        assert_eq!(bond.tau, 2.5);
        assert_eq!(bond.source, "corpus");
        assert_eq!(bond.id, "adj1_noun1");
    }

    #[test]
    fn test_strict_rejects_bad_number() {
        let result: Result<BondNode> = decode_line("b1,dark,forest,abc,0.1,2.5,corpus", DecodeMode::Strict);
        assert!(matches!(result, Err(crate::Error::Decode { .. })));
    }

    #[test]
    fn test_tolerant_defaults_bad_number() {
        let bond: BondNode =
            decode_line(r#""b1", "dark", "forest", "abc", "", "x", "corpus""#, DecodeMode::Tolerant).unwrap();
        assert_eq!((bond.a, bond.s, bond.tau), (0.0, 0.0, 2.5));
    }

    #[test]
    fn test_bond_encoding_is_minimally_quoted() {
        let bond = BondNode::new("b1", "dark", "forest").with_coords(0.5, -0.25, 3.0);
        assert_eq!(encode_row(&bond).unwrap(), "b1,dark,forest,0.5,-0.25,3.0,corpus");
    }

    #[test]
    fn test_book_encoding_quotes_everything() {
        let book = BookNode::new("bk1", "Psychology and Alchemy").by("Jung, C.G.");
        assert_eq!(
            encode_row(&book).unwrap(),
            r#""bk1","Psychology and Alchemy","Jung, C.G.","","""#
        );
    }

    #[test]
    fn test_legacy_book_layout() {
        let data = "\"Jung\", \"bk1\", \"Aion\", \"aion.txt\"\n";
        let books: Vec<BookNode> = RecordReader::<BookNode, _>::from_reader(data.as_bytes(), DecodeMode::Tolerant)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(books, vec![BookNode::new("bk1", "Aion").by("Jung").with_filename("aion.txt")]);
    }

    #[test]
    fn test_legacy_follows_null_weight() {
        let edge: FollowsEdge = decode_line(r#""b1", "b2", NULL, "corpus", "bk1""#, DecodeMode::Tolerant).unwrap();
        assert_eq!(edge.weight, 1.0);
        assert_eq!(edge.book_id.as_deref(), Some("bk1"));

        let edge: FollowsEdge = decode_line(r#""b1", "b2", 0.4, "corpus""#, DecodeMode::Tolerant).unwrap();
        assert_eq!(edge.weight, 0.4);
        assert_eq!(edge.book_id, None);
    }

    #[test]
    fn test_vocab_invalid_uuid_becomes_null() {
        let data = "bond,first_seen_order,first_seen_book,total_count,book_count,created_at\n\
                    dark_forest,3,not-a-uuid,7,2,\n";
        let mut reader =
            RecordReader::<BondVocabEntry, _>::from_reader(data.as_bytes(), DecodeMode::Strict).unwrap();
        let entry = reader.next().unwrap().unwrap();
        assert_eq!(entry.first_seen_book, None);
        assert_eq!(entry.total_count, 7);
        assert_eq!(reader.stats().coerced, 1);
    }

    #[test]
    fn test_tolerant_reader_skips_unusable_rows() {
        let data = "id, adj, noun, A, S, tau, source\n\
                    \"b1\", \"dark\", \"forest\", 0.1, 0.2, 2.0, \"corpus\"\n\
                    \"b2\", \"\", \"\", 0.1, 0.2, 2.0, \"corpus\"\n\
                    \"b3\", \"old\", \"tree\", oops, 0.2, 2.0, \"corpus\"\n";
        let mut reader =
            RecordReader::<BondNode, _>::from_reader(data.as_bytes(), DecodeMode::Tolerant).unwrap();
        let bonds: Vec<BondNode> = reader.by_ref().collect::<Result<_>>().unwrap();
        assert_eq!(bonds.len(), 2);
        assert_eq!(bonds[1].a, 0.0);
        let stats = reader.stats();
        assert_eq!((stats.rows, stats.skipped, stats.coerced), (2, 1, 1));
    }

    #[test]
    fn test_writer_then_strict_reader() {
        let coords = vec![
            WordCoordinate::new("shadow", -0.4, 0.3, 3.5, "json"),
            WordCoordinate::new("anima", 0.2, 0.8, 4.0, "json"),
        ];
        let mut writer = RecordWriter::from_writer(Vec::new()).unwrap();
        writer.write_all(&coords).unwrap();
        let bytes = writer.into_inner().unwrap();

        let read: Vec<WordCoordinate> = RecordReader::<WordCoordinate, _>::from_reader(bytes.as_slice(), DecodeMode::Strict)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(read, coords);
    }

    proptest! {
        #[test]
        fn tolerant_numeric_fields_never_fail(a in "\\PC{0,8}", s in "[-0-9.eE]{0,6}") {
            let line = format!("\"b1\", \"dark\", \"forest\", \"{}\", {}, 2.5, \"corpus\"",
                a.replace(['"', ','], ""), s);
            let bond: BondNode = decode_line(&line, DecodeMode::Tolerant).unwrap();
            prop_assert!(bond.a.is_finite());
            prop_assert!(bond.s.is_finite());
            prop_assert_eq!(bond.tau, 2.5);
        }
    }
}
