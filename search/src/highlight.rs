//! Snippet rendering: matched terms get wrapped in `**` markers and
//! fragments from different fields are stitched with an ellipsis, so a UI
//! can render excerpts without re-tokenizing the document.

use std::ops::Range;

use tantivy::snippet::Snippet;

const MARK: &str = "**";
const JOIN: &str = "…";

/// Wrap each highlighted byte range of `fragment` in `**` markers. Ranges
/// come from the snippet generator and are sorted and non-overlapping.
pub fn mark_ranges(fragment: &str, ranges: &[Range<usize>]) -> String {
    let mut out = String::with_capacity(fragment.len() + ranges.len() * 4);
    let mut cursor = 0;
    for range in ranges {
        out.push_str(&fragment[cursor..range.start]);
        out.push_str(MARK);
        out.push_str(&fragment[range.start..range.end]);
        out.push_str(MARK);
        cursor = range.end;
    }
    out.push_str(&fragment[cursor..]);
    out
}

/// Marked-up excerpt for one field, or `None` when nothing matched in it.
pub fn render(snippet: &Snippet) -> Option<String> {
    if snippet.fragment().is_empty() {
        return None;
    }
    Some(mark_ranges(snippet.fragment(), snippet.highlighted()))
}

/// Stitch per-field excerpts into the single display string.
pub fn join_fragments(fragments: &[String]) -> Option<String> {
    if fragments.is_empty() {
        None
    } else {
        Some(fragments.join(JOIN))
    }
}
