// src/codec/ranges.rs

//! Compact chunk-number range expressions.
//!
//! The downloads protocol describes sets of chunk numbers as a comma
//! separated list of singletons and inclusive runs, e.g. `"1-3,5,7-9"`.

use std::collections::BTreeSet;

use crate::error::{AppError, Result};
use crate::models::ChunkNum;

/// Parse a range expression into the set of chunk numbers it covers.
///
/// The empty string parses to the empty set.
pub fn parse_chunk_range(input: &str) -> Result<BTreeSet<ChunkNum>> {
    let mut out = BTreeSet::new();
    let input = input.trim();
    if input.is_empty() {
        return Ok(out);
    }
    for part in input.split(',') {
        match part.split_once('-') {
            Some((start, end)) => {
                let start: ChunkNum = start
                    .parse()
                    .map_err(|_| AppError::malformed_redirect(format!("bad range start: {part}")))?;
                let end: ChunkNum = end
                    .parse()
                    .map_err(|_| AppError::malformed_redirect(format!("bad range end: {part}")))?;
                if start > end {
                    return Err(AppError::malformed_redirect(format!(
                        "inverted range: {part}"
                    )));
                }
                out.extend(start..=end);
            }
            None => {
                let num: ChunkNum = part
                    .parse()
                    .map_err(|_| AppError::malformed_redirect(format!("bad chunk number: {part}")))?;
                out.insert(num);
            }
        }
    }
    Ok(out)
}

/// Emit a set of chunk numbers as a normalized range expression: sorted,
/// maximal runs, singletons as `N`, runs as `A-B`. The empty set emits the
/// empty string.
pub fn build_chunk_ranges(numbers: &BTreeSet<ChunkNum>) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut iter = numbers.iter().copied();
    let Some(mut run_start) = iter.next() else {
        return String::new();
    };
    let mut run_end = run_start;
    for num in iter {
        if num == run_end + 1 {
            run_end = num;
        } else {
            parts.push(format_run(run_start, run_end));
            run_start = num;
            run_end = num;
        }
    }
    parts.push(format_run(run_start, run_end));
    parts.join(",")
}

fn format_run(start: ChunkNum, end: ChunkNum) -> String {
    if start == end {
        format!("{start}")
    } else {
        format!("{start}-{end}")
    }
}
