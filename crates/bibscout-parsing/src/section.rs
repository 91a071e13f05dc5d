//! References-section detection and segmentation.
//!
//! The section starts at the markdown references heading and ends at the
//! next top-level heading. Inside it, a bulleted line starts a new entry, a
//! blank line ends the current one, and a sufficiently long line whose
//! opening tokens read like an author list may start an entry without a
//! bullet (converters sometimes drop the markers). Fragments shorter than
//! [`MIN_ENTRY_LEN`] are discarded as noise.

/// Heading that opens the references section (compared case-insensitively
/// against the trimmed line).
pub const REFERENCES_HEADING: &str = "## references";

/// Minimum length of a trimmed entry; anything shorter is noise.
pub const MIN_ENTRY_LEN: usize = 50;

/// Minimum length for a line to start an entry without a bullet marker.
const MIN_UNBULLETED_START_LEN: usize = 20;

/// Lazy iterator over raw reference strings. Finite, consumed once;
/// re-invoke [`segment_references`] to scan again.
pub struct Segments<'a> {
    lines: std::str::Lines<'a>,
    in_section: bool,
    finished: bool,
    current: Vec<&'a str>,
}

/// Scan converted document text for the references section and yield its
/// entries lazily.
pub fn segment_references(text: &str) -> Segments<'_> {
    Segments {
        lines: text.lines(),
        in_section: false,
        finished: false,
        current: Vec::new(),
    }
}

/// Do the first few tokens look like the start of an author list?
fn starts_author_like(line: &str) -> bool {
    line.split_whitespace().take(3).any(|w| w.ends_with(','))
}

impl Segments<'_> {
    /// Close out the in-progress entry, dropping short fragments.
    fn flush(&mut self) -> Option<String> {
        if self.current.is_empty() {
            return None;
        }
        let joined = self.current.join("\n");
        self.current.clear();
        let trimmed = joined.trim();
        if trimmed.len() >= MIN_ENTRY_LEN {
            Some(trimmed.to_string())
        } else {
            None
        }
    }
}

impl Iterator for Segments<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.finished {
            return self.flush();
        }

        loop {
            let Some(raw) = self.lines.next() else {
                self.finished = true;
                return self.flush();
            };
            let line = raw.trim();

            if !self.in_section {
                if line.eq_ignore_ascii_case(REFERENCES_HEADING) {
                    self.in_section = true;
                }
                continue;
            }

            if line.starts_with("## ") {
                if line.eq_ignore_ascii_case(REFERENCES_HEADING) {
                    // A repeated references heading just separates entries.
                    if let Some(entry) = self.flush() {
                        return Some(entry);
                    }
                    continue;
                }
                self.finished = true;
                return self.flush();
            }

            if line.starts_with("- ") {
                let flushed = self.flush();
                self.current.push(line);
                if flushed.is_some() {
                    return flushed;
                }
                continue;
            }

            if line.is_empty() {
                if let Some(entry) = self.flush() {
                    return Some(entry);
                }
                continue;
            }

            if !self.current.is_empty() {
                self.current.push(line);
                continue;
            }

            if line.len() > MIN_UNBULLETED_START_LEN && starts_author_like(line) {
                self.current.push(line);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(text: &str) -> Vec<String> {
        segment_references(text).collect()
    }

    const LONG_A: &str =
        "- Smith, A. 2020. A sufficiently long reference entry about something interesting.";
    const LONG_B: &str =
        "- Jones, B. 2021. Another sufficiently long reference entry about other things.";

    #[test]
    fn test_no_references_section() {
        assert!(collect("# Title\n\nBody text only.\n").is_empty());
    }

    #[test]
    fn test_bulleted_entries() {
        let text = format!("## References\n\n{LONG_A}\n{LONG_B}\n");
        let refs = collect(&text);
        assert_eq!(refs.len(), 2);
        assert!(refs[0].contains("Smith"));
        assert!(refs[1].contains("Jones"));
    }

    #[test]
    fn test_heading_match_is_case_insensitive() {
        let text = format!("## REFERENCES\n\n{LONG_A}\n");
        assert_eq!(collect(&text).len(), 1);
    }

    #[test]
    fn test_continuation_lines_join() {
        let text = "## References\n\n- Smith, A. 2020. A reference whose text\n  continues on the following line with more detail.\n";
        let refs = collect(text);
        assert_eq!(refs.len(), 1);
        assert!(refs[0].contains("continues on the following line"));
    }

    #[test]
    fn test_blank_line_terminates_entry() {
        let text = format!("## References\n\n{LONG_A}\n\n{LONG_B}\n");
        assert_eq!(collect(&text).len(), 2);
    }

    #[test]
    fn test_section_ends_at_next_heading() {
        let text = format!("## References\n\n{LONG_A}\n\n## Appendix\n\n{LONG_B}\n");
        let refs = collect(&text);
        assert_eq!(refs.len(), 1);
        assert!(refs[0].contains("Smith"));
    }

    #[test]
    fn test_short_entries_discarded() {
        let text = "## References\n\n- Too short.\n";
        assert!(collect(text).is_empty());
    }

    #[test]
    fn test_unbulleted_author_start() {
        let text = "## References\n\nSmith, A. and Jones, B. 2020. An entry without any bullet marker at all.\n";
        let refs = collect(text);
        assert_eq!(refs.len(), 1);
        assert!(refs[0].starts_with("Smith"));
    }

    #[test]
    fn test_unbulleted_non_author_line_ignored() {
        let text = "## References\n\nThis is just a stray paragraph without author formatting\n";
        assert!(collect(text).is_empty());
    }

    #[test]
    fn test_lazy_iteration() {
        let text = format!("## References\n\n{LONG_A}\n{LONG_B}\n");
        let mut segments = segment_references(&text);
        assert!(segments.next().is_some());
        assert!(segments.next().is_some());
        assert!(segments.next().is_none());
    }
}
