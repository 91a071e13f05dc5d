//! Boundary to the document-conversion collaborator.
//!
//! Conversion itself (PDF, OCR, layout) is someone else's job; this core
//! only consumes the result: page text for reference segmentation and
//! document-level metadata to seed the first query. [`MarkdownConverter`]
//! reads an already-converted markdown file and lifts metadata from the
//! YAML front matter such converters emit.

use std::path::Path;

use thiserror::Error;

use crate::authors::surname;
use crate::bibtex::{generate_key, CitationEntry, EntryType};
use crate::Query;

/// Document-level metadata reported by the converter.
#[derive(Debug, Clone, Default)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub year: Option<i32>,
    pub doi: Option<String>,
    pub abstract_text: Option<String>,
    pub keywords: Vec<String>,
}

impl DocumentMetadata {
    /// Seed the document's own resolution query. `None` when the metadata
    /// carries neither a title nor a DOI.
    pub fn to_query(&self) -> Option<Query> {
        if self.title.is_none() && self.doi.is_none() {
            return None;
        }
        Some(Query {
            title: self.title.clone().unwrap_or_default(),
            year: self.year,
            doi: self.doi.clone(),
            authors: self.authors.iter().map(|a| surname(a)).collect(),
        })
    }
}

/// A converted document: full text plus whatever metadata the converter
/// could extract.
#[derive(Debug, Clone)]
pub struct ConvertedDocument {
    pub text: String,
    pub metadata: DocumentMetadata,
}

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported input: {0}")]
    Unsupported(String),
}

/// The conversion collaborator, consumed as a black box.
pub trait DocumentConverter {
    fn convert(&self, path: &Path) -> Result<ConvertedDocument, ConvertError>;
}

/// Reads markdown produced by an upstream converter, parsing the YAML front
/// matter block for document metadata.
#[derive(Debug, Default)]
pub struct MarkdownConverter;

impl DocumentConverter for MarkdownConverter {
    fn convert(&self, path: &Path) -> Result<ConvertedDocument, ConvertError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_lowercase();
        if !matches!(ext.as_str(), "md" | "markdown" | "txt") {
            return Err(ConvertError::Unsupported(format!(
                "{} (expected converted markdown)",
                path.display()
            )));
        }

        let text = std::fs::read_to_string(path)?;
        let metadata = parse_front_matter(&text);
        Ok(ConvertedDocument { text, metadata })
    }
}

fn unquote(value: &str) -> String {
    value.trim().trim_matches('"').trim().to_string()
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(unquote)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse the leading `---` front matter block, if any. Unknown keys are
/// ignored; a missing or malformed block yields empty metadata.
pub fn parse_front_matter(text: &str) -> DocumentMetadata {
    let mut metadata = DocumentMetadata::default();

    let mut lines = text.lines();
    if lines.next().map(str::trim) != Some("---") {
        return metadata;
    }

    for line in lines {
        let line = line.trim();
        if line == "---" {
            break;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim() {
            "title" => metadata.title = Some(unquote(value)).filter(|t| !t.is_empty()),
            "year" => metadata.year = unquote(value).parse().ok(),
            "doi" => metadata.doi = Some(unquote(value)).filter(|d| !d.is_empty()),
            "authors" => metadata.authors = parse_list(value),
            "keywords" => metadata.keywords = parse_list(value),
            "abstract" => {
                metadata.abstract_text = Some(unquote(value)).filter(|a| !a.is_empty())
            }
            _ => {}
        }
    }

    metadata
}

/// Build the document's own citation record directly from converter
/// metadata, for when no provider could resolve it.
pub fn entry_from_metadata(metadata: &DocumentMetadata) -> Option<CitationEntry> {
    let title = metadata.title.as_deref()?;

    let key = generate_key(&metadata.authors, metadata.year, title);
    let mut entry = CitationEntry::new(key, EntryType::Article);
    entry.set("title", title);
    if !metadata.authors.is_empty() {
        entry.set("author", metadata.authors.join(" and "));
    }
    if let Some(year) = metadata.year {
        entry.set("year", year.to_string());
    }
    if let Some(ref doi) = metadata.doi {
        entry.set("doi", doi.as_str());
    }
    if let Some(ref abstract_text) = metadata.abstract_text {
        if abstract_text.len() > 50 {
            entry.set("abstract", abstract_text.as_str());
        }
    }
    if !metadata.keywords.is_empty() {
        entry.set("keywords", metadata.keywords.join(", "));
    }
    Some(entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"---
title: "Example Paper"
authors: ["Alice Smith", "Bob Jones"]
year: 2022
doi: "10.1/ex"
keywords: ["testing", "examples"]
---
# Example Paper

## References

- Something.
"#;

    #[test]
    fn test_parse_front_matter() {
        let metadata = parse_front_matter(DOC);
        assert_eq!(metadata.title.as_deref(), Some("Example Paper"));
        assert_eq!(metadata.authors, vec!["Alice Smith", "Bob Jones"]);
        assert_eq!(metadata.year, Some(2022));
        assert_eq!(metadata.doi.as_deref(), Some("10.1/ex"));
        assert_eq!(metadata.keywords, vec!["testing", "examples"]);
    }

    #[test]
    fn test_parse_front_matter_absent() {
        let metadata = parse_front_matter("# Just a document\n\nBody.");
        assert!(metadata.title.is_none());
        assert!(metadata.authors.is_empty());
    }

    #[test]
    fn test_to_query_surnames() {
        let metadata = parse_front_matter(DOC);
        let query = metadata.to_query().unwrap();
        assert_eq!(query.title, "Example Paper");
        assert_eq!(query.authors, vec!["Smith", "Jones"]);
        assert_eq!(query.doi.as_deref(), Some("10.1/ex"));
    }

    #[test]
    fn test_to_query_requires_title_or_doi() {
        assert!(DocumentMetadata::default().to_query().is_none());
    }

    #[test]
    fn test_entry_from_metadata() {
        let metadata = parse_front_matter(DOC);
        let entry = entry_from_metadata(&metadata).unwrap();
        assert_eq!(entry.key, "smith2022example");
        assert_eq!(entry.get("author"), Some("Alice Smith and Bob Jones"));
        assert_eq!(entry.get("keywords"), Some("testing, examples"));
    }

    #[test]
    fn test_markdown_converter_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paper.md");
        std::fs::write(&path, DOC).unwrap();

        let doc = MarkdownConverter.convert(&path).unwrap();
        assert!(doc.text.contains("## References"));
        assert_eq!(doc.metadata.title.as_deref(), Some("Example Paper"));
    }

    #[test]
    fn test_markdown_converter_rejects_other_extensions() {
        let err = MarkdownConverter.convert(Path::new("paper.pdf"));
        assert!(matches!(err, Err(ConvertError::Unsupported(_))));
    }
}
