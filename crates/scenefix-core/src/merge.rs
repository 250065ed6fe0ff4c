//! Patch merging.
//!
//! Splices a repaired region back into the full source. The original source is
//! never modified; a successful merge returns a new candidate and the
//! strategy that produced it.

use serde::{Deserialize, Serialize};

use crate::classify::ErrorDescriptor;
use crate::region::CodeRegion;

/// How a merge located its splice point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    ExactSubstring,
    AnchoredLines,
    /// Spliced at the extracted region's own line span.
    RegionSpan,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedSource {
    pub source: String,
    pub strategy: MergeStrategy,
}

/// No unambiguous splice point.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MergeError {
    #[error("original region is empty")]
    EmptyRegion,

    #[error("region not found verbatim and no in-range error line to anchor on")]
    NoAnchorLine,

    #[error("no line matches region head {0:?}")]
    AnchorNotFound(String),

    #[error("anchored span at line {line} runs past end of file")]
    SpanOutOfBounds { line: usize },
}

/// Splice `repaired` into `full` in place of `original`.
///
/// Tries an exact substring replacement first, then a line-anchored
/// replacement when the error carries a line number.
pub fn merge_patch(
    full: &str,
    original: &str,
    repaired: &str,
    error: &ErrorDescriptor,
) -> Result<MergedSource, MergeError> {
    if original.trim().is_empty() {
        return Err(MergeError::EmptyRegion);
    }

    if full.contains(original) {
        return Ok(MergedSource {
            source: full.replacen(original, repaired, 1),
            strategy: MergeStrategy::ExactSubstring,
        });
    }

    let full_lines: Vec<&str> = full.split('\n').collect();
    if !error
        .line
        .is_some_and(|l| l >= 1 && (l as usize) <= full_lines.len())
    {
        return Err(MergeError::NoAnchorLine);
    }

    let original_lines: Vec<&str> = original.split('\n').collect();
    let head = original_lines
        .iter()
        .map(|l| l.trim())
        .find(|l| !l.is_empty())
        .unwrap_or_default();
    let head_offset = original_lines
        .iter()
        .position(|l| l.trim() == head)
        .unwrap_or(0);

    let anchor = full_lines
        .iter()
        .position(|l| l.trim() == head)
        .ok_or_else(|| MergeError::AnchorNotFound(head.to_string()))?;

    let start = anchor
        .checked_sub(head_offset)
        .ok_or(MergeError::SpanOutOfBounds { line: anchor + 1 })?;
    let end = start + original_lines.len();
    if end > full_lines.len() {
        return Err(MergeError::SpanOutOfBounds { line: anchor + 1 });
    }

    let mut merged: Vec<&str> = Vec::with_capacity(full_lines.len());
    merged.extend_from_slice(&full_lines[..start]);
    merged.extend(repaired.split('\n'));
    merged.extend_from_slice(&full_lines[end..]);

    Ok(MergedSource {
        source: merged.join("\n"),
        strategy: MergeStrategy::AnchoredLines,
    })
}

/// Splice `repaired` over an extracted region.
///
/// When an earlier copy of the region's text exists in `full`, the splice goes
/// to the region's own `start..end` span instead of the first occurrence.
/// Otherwise behaves like [`merge_patch`].
pub fn merge_region(
    full: &str,
    region: &CodeRegion,
    repaired: &str,
    error: &ErrorDescriptor,
) -> Result<MergedSource, MergeError> {
    if region.text.trim().is_empty() {
        return Err(MergeError::EmptyRegion);
    }

    let lines: Vec<&str> = full.split('\n').collect();
    let in_place = region.start < region.end
        && region.end <= lines.len()
        && lines[region.start..region.end].join("\n") == region.text;
    if in_place {
        let offset: usize = lines[..region.start].iter().map(|l| l.len() + 1).sum();
        if full.find(region.text.as_str()) != Some(offset) {
            let mut merged: Vec<&str> = Vec::with_capacity(lines.len());
            merged.extend_from_slice(&lines[..region.start]);
            merged.extend(repaired.split('\n'));
            merged.extend_from_slice(&lines[region.end..]);
            return Ok(MergedSource {
                source: merged.join("\n"),
                strategy: MergeStrategy::RegionSpan,
            });
        }
    }

    merge_patch(full, &region.text, repaired, error)
}
