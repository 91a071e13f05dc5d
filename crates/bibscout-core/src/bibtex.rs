//! BibTeX record model, citation-key generation, and the record writer.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::authors::normalize_surname;
use crate::provider::CandidateRecord;

/// BibTeX entry types this tool emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    Article,
    Inproceedings,
    Book,
    Inbook,
    Phdthesis,
    Techreport,
    Unpublished,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Article => "article",
            EntryType::Inproceedings => "inproceedings",
            EntryType::Book => "book",
            EntryType::Inbook => "inbook",
            EntryType::Phdthesis => "phdthesis",
            EntryType::Techreport => "techreport",
            EntryType::Unpublished => "unpublished",
        }
    }

    /// Lenient parse: unknown or exotic types fall back to `article`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "article" => EntryType::Article,
            "inproceedings" | "conference" => EntryType::Inproceedings,
            "book" => EntryType::Book,
            "inbook" | "incollection" => EntryType::Inbook,
            "phdthesis" | "mastersthesis" | "thesis" => EntryType::Phdthesis,
            "techreport" | "report" => EntryType::Techreport,
            "unpublished" | "misc" => EntryType::Unpublished,
            _ => EntryType::Article,
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved citation record: key, type, and ordered fields.
///
/// Field insertion order is preserved and is the serialization order, so
/// output is stable across runs.
#[derive(Debug, Clone, PartialEq)]
pub struct CitationEntry {
    pub key: String,
    pub entry_type: EntryType,
    fields: Vec<(String, String)>,
}

fn is_blank(value: &str) -> bool {
    value.trim().is_empty() || value.trim() == "{}"
}

impl CitationEntry {
    pub fn new(key: impl Into<String>, entry_type: EntryType) -> Self {
        Self {
            key: key.into(),
            entry_type,
            fields: Vec::new(),
        }
    }

    /// Build an entry from a provider candidate. Field order follows the
    /// conventional BibTeX layout and is the output order.
    pub fn from_candidate(record: &CandidateRecord) -> Self {
        let author_names: Vec<String> =
            record.authors.iter().map(|a| a.display_name()).collect();
        let key = generate_key(&author_names, record.year, &record.title);

        let mut entry = Self::new(key, record.entry_type);
        entry.set("title", record.title.as_str());
        if !author_names.is_empty() {
            entry.set("author", author_names.join(" and "));
        }
        if let Some(year) = record.year {
            entry.set("year", year.to_string());
        }
        if let Some(ref doi) = record.doi {
            entry.set("doi", doi.as_str());
        }
        if let Some(ref venue) = record.venue {
            match record.entry_type {
                EntryType::Inproceedings => entry.set("booktitle", venue.as_str()),
                _ => entry.set("journal", venue.as_str()),
            }
        }
        if let Some(ref publisher) = record.publisher {
            entry.set("publisher", publisher.as_str());
        }
        if let Some(ref pages) = record.pages {
            entry.set("pages", pages.as_str());
        }
        if let Some(ref volume) = record.volume {
            entry.set("volume", volume.as_str());
        }
        if let Some(ref issue) = record.issue {
            entry.set("number", issue.as_str());
        }
        entry
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// True when the field is absent or blank.
    pub fn is_empty_field(&self, name: &str) -> bool {
        self.get(name).map(is_blank).unwrap_or(true)
    }

    /// Set a field, keeping its original position if it already exists.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        if let Some(slot) = self.fields.iter_mut().find(|(k, _)| k == name) {
            slot.1 = value;
        } else {
            self.fields.push((name.to_string(), value));
        }
    }

    /// Set a field only when it is currently absent or blank.
    pub fn set_if_empty(&mut self, name: &str, value: impl Into<String>) {
        if self.is_empty_field(name) {
            self.set(name, value);
        }
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.fields.len();
        self.fields.retain(|(k, _)| k != name);
        self.fields.len() != before
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Serialize to a BibTeX record. Blank fields are dropped rather than
    /// emitted empty; reserved characters are escaped here, not in storage.
    pub fn to_bibtex(&self) -> String {
        let mut lines = vec![format!("@{}{{{},", self.entry_type, self.key)];
        let body: Vec<String> = self
            .fields
            .iter()
            .filter(|(_, v)| !is_blank(v))
            .map(|(k, v)| format!("  {} = {{{}}}", k, escape_value(v)))
            .collect();
        lines.push(body.join(",\n"));
        lines.push("}".to_string());
        lines.join("\n")
    }
}

impl fmt::Display for CitationEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_bibtex())
    }
}

/// Escape characters BibTeX reserves for formatting.
pub fn escape_value(value: &str) -> String {
    value
        .replace('&', "\\&")
        .replace('%', "\\%")
        .replace('$', "\\$")
        .replace('#', "\\#")
        .replace('_', "\\_")
        .replace('{', "\\{")
        .replace('}', "\\}")
        .replace('~', "\\~{}")
        .replace('^', "\\^{}")
}

fn keep_alnum(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

/// Derive a citation key: first-author surname + year + first significant
/// title word, each lower-cased and stripped to `[a-z0-9]`. Missing year
/// omits that segment; an empty author or title component collapses to
/// `"unknown"`.
pub fn generate_key(authors: &[String], year: Option<i32>, title: &str) -> String {
    let author_part = authors
        .first()
        .map(|a| keep_alnum(&normalize_surname(a)))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string());

    let year_part = year.map(|y| y.to_string()).unwrap_or_default();

    static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\w+\b").unwrap());
    let cleaned = title.replace(['(', ')', ':', '-'], " ");
    let title_part = WORD
        .find(&cleaned)
        .map(|m| keep_alnum(m.as_str()))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string());

    format!("{author_part}{year_part}{title_part}")
}

fn chunks_to_string(chunks: &[biblatex::Spanned<biblatex::Chunk>]) -> String {
    chunks
        .iter()
        .map(|c| match &c.v {
            biblatex::Chunk::Normal(s) => s.as_str(),
            biblatex::Chunk::Verbatim(s) => s.as_str(),
            biblatex::Chunk::Math(s) => s.as_str(),
        })
        .collect::<Vec<_>>()
        .join("")
}

/// Canonical field order used when re-reading foreign BibTeX text.
const PARSE_FIELD_ORDER: &[&str] = &[
    "title",
    "author",
    "year",
    "doi",
    "journal",
    "booktitle",
    "publisher",
    "address",
    "pages",
    "articleno",
    "numpages",
    "volume",
    "number",
    "issn",
    "isbn",
    "url",
    "abstract",
    "keywords",
];

/// Parse the first entry out of a BibTeX string (e.g. a cached value or the
/// fallback provider's export). Returns `None` on unparsable input.
pub fn parse_bibtex(src: &str) -> Option<CitationEntry> {
    let bibliography = biblatex::Bibliography::parse(src).ok()?;
    let parsed = bibliography.iter().next()?;

    // Debug form of biblatex's entry type is the variant name; our lenient
    // parse lowercases it and falls back to `article` for exotic types.
    let entry_type = EntryType::parse(&format!("{:?}", parsed.entry_type));
    let mut entry = CitationEntry::new(parsed.key.clone(), entry_type);

    for &name in PARSE_FIELD_ORDER {
        if name == "author" {
            // Prefer biblatex's name parser so "Given Family" inputs come
            // back in "Family, Given" form.
            let authors: Vec<String> = parsed
                .author()
                .unwrap_or_default()
                .into_iter()
                .filter(|p| !p.name.is_empty())
                .map(|p| {
                    if p.given_name.is_empty() {
                        p.name
                    } else {
                        format!("{}, {}", p.name, p.given_name)
                    }
                })
                .collect();
            if !authors.is_empty() {
                entry.set("author", authors.join(" and "));
                continue;
            }
        }
        if let Some(chunks) = parsed.get(name) {
            let value = chunks_to_string(chunks);
            if !is_blank(&value) {
                entry.set(name, value);
            }
        }
    }

    if entry.fields.is_empty() {
        return None;
    }
    Some(entry)
}

/// Serialize a batch of records, one blank line between entries.
pub fn write_bibliography(entries: &[CitationEntry]) -> String {
    let mut out = entries
        .iter()
        .map(CitationEntry::to_bibtex)
        .collect::<Vec<_>>()
        .join("\n\n");
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::CandidateAuthor;

    #[test]
    fn test_generate_key_full() {
        let key = generate_key(
            &["Doe, John".to_string()],
            Some(2023),
            "Deep Learning for X",
        );
        assert_eq!(key, "doe2023deep");
    }

    #[test]
    fn test_generate_key_western_name_order() {
        let key = generate_key(&["John Doe".to_string()], Some(2023), "Deep Learning");
        assert_eq!(key, "doe2023deep");
    }

    #[test]
    fn test_generate_key_missing_year() {
        let key = generate_key(&["Doe, John".to_string()], None, "Deep Learning");
        assert_eq!(key, "doedeep");
    }

    #[test]
    fn test_generate_key_no_authors() {
        let key = generate_key(&[], Some(2021), "Attention Is All You Need");
        assert_eq!(key, "unknown2021attention");
    }

    #[test]
    fn test_generate_key_empty_title() {
        let key = generate_key(&["Smith, A".to_string()], Some(2020), "");
        assert_eq!(key, "smith2020unknown");
    }

    #[test]
    fn test_generate_key_leading_punctuation() {
        let key = generate_key(&["Smith, A".to_string()], Some(2020), "(Re)thinking: Things");
        assert_eq!(key, "smith2020re");
    }

    #[test]
    fn test_escape_value() {
        assert_eq!(escape_value("A & B"), "A \\& B");
        assert_eq!(escape_value("50%"), "50\\%");
        assert_eq!(escape_value("x_y"), "x\\_y");
        assert_eq!(escape_value("a~b^c"), "a\\~{}b\\^{}c");
    }

    #[test]
    fn test_to_bibtex_field_order_and_empty_drop() {
        let mut entry = CitationEntry::new("doe2023deep", EntryType::Article);
        entry.set("title", "Deep Learning for X");
        entry.set("author", "Doe, John");
        entry.set("note", "   ");
        entry.set("year", "2023");

        let out = entry.to_bibtex();
        assert!(out.starts_with("@article{doe2023deep,"));
        let title_pos = out.find("title").unwrap();
        let author_pos = out.find("author").unwrap();
        let year_pos = out.find("year").unwrap();
        assert!(title_pos < author_pos && author_pos < year_pos);
        assert!(!out.contains("note"));

        // Insertion order is also what the field iterator reports.
        let names: Vec<&str> = entry.fields().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["title", "author", "note", "year"]);
    }

    #[test]
    fn test_set_if_empty() {
        let mut entry = CitationEntry::new("k", EntryType::Article);
        entry.set("publisher", "ACM");
        entry.set_if_empty("publisher", "IEEE");
        assert_eq!(entry.get("publisher"), Some("ACM"));
        entry.set_if_empty("volume", "12");
        assert_eq!(entry.get("volume"), Some("12"));
    }

    #[test]
    fn test_from_candidate_article() {
        let record = CandidateRecord {
            doi: Some("10.1/ex".into()),
            title: "Example Paper".into(),
            authors: vec![CandidateAuthor {
                given: "A".into(),
                family: "Smith".into(),
            }],
            year: Some(2022),
            venue: Some("Journal of Examples".into()),
            ..Default::default()
        };
        let entry = CitationEntry::from_candidate(&record);
        assert_eq!(entry.key, "smith2022example");
        assert_eq!(entry.entry_type, EntryType::Article);
        assert_eq!(entry.get("author"), Some("Smith, A"));
        assert_eq!(entry.get("doi"), Some("10.1/ex"));
        assert_eq!(entry.get("journal"), Some("Journal of Examples"));
    }

    #[test]
    fn test_from_candidate_inproceedings_uses_booktitle() {
        let record = CandidateRecord {
            title: "Conf Paper".into(),
            venue: Some("CHI '24".into()),
            entry_type: EntryType::Inproceedings,
            ..Default::default()
        };
        let entry = CitationEntry::from_candidate(&record);
        assert_eq!(entry.get("booktitle"), Some("CHI '24"));
        assert_eq!(entry.get("journal"), None);
    }

    #[test]
    fn test_parse_bibtex_roundtrip() {
        let src = "@inproceedings{smith2022example,\n  title = {Example Paper},\n  author = {Smith, Alice and Jones, Bob},\n  year = {2022},\n  doi = {10.1/ex},\n  booktitle = {Proceedings of Examples}\n}";
        let entry = parse_bibtex(src).expect("parse");
        assert_eq!(entry.key, "smith2022example");
        assert_eq!(entry.entry_type, EntryType::Inproceedings);
        assert_eq!(entry.get("title"), Some("Example Paper"));
        assert_eq!(entry.get("author"), Some("Smith, Alice and Jones, Bob"));
        assert_eq!(entry.get("booktitle"), Some("Proceedings of Examples"));
    }

    #[test]
    fn test_parse_bibtex_garbage() {
        assert!(parse_bibtex("not bibtex at all").is_none());
    }

    #[test]
    fn test_write_bibliography() {
        let mut a = CitationEntry::new("a", EntryType::Article);
        a.set("title", "A");
        let mut b = CitationEntry::new("b", EntryType::Book);
        b.set("title", "B");
        let out = write_bibliography(&[a, b]);
        assert!(out.contains("@article{a,"));
        assert!(out.contains("\n\n@book{b,"));
        assert!(out.ends_with('\n'));
    }
}
