//! Reference-list extraction from converted document text.
//!
//! [`section::segment_references`] walks the document for the references
//! heading and yields raw reference strings lazily;
//! [`reference::parse_reference`] turns one raw string into a resolution
//! query (title, authors, year, DOI hints).

pub mod reference;
pub mod section;

pub use reference::{parse_reference, ParsedReference};
pub use section::{segment_references, Segments};
