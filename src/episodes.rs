//! Episode-number range compression shared by the sync-side message
//! batcher and the webhook aggregator.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;

/// Collapse a sorted episode set into `E01-E03 E05 E07-E08` notation.
/// Consecutive runs become a range, singletons stay alone.
pub fn compress_episodes(episodes: &BTreeSet<u32>) -> String {
    let mut out = String::new();
    let mut iter = episodes.iter().copied();
    let Some(first) = iter.next() else {
        return out;
    };

    let mut start = first;
    let mut end = first;
    let flush = |out: &mut String, start: u32, end: u32| {
        if !out.is_empty() {
            out.push(' ');
        }
        if start == end {
            let _ = write!(out, "E{start:02}");
        } else {
            let _ = write!(out, "E{start:02}-E{end:02}");
        }
    };

    for ep in iter {
        if ep == end + 1 {
            end = ep;
        } else {
            flush(&mut out, start, end);
            start = ep;
            end = ep;
        }
    }
    flush(&mut out, start, end);
    out
}

/// Render per-season episode sets as `S01 E01-E03 E05, S02 E01`.
pub fn format_seasons(by_season: &BTreeMap<u32, BTreeSet<u32>>) -> String {
    by_season
        .iter()
        .filter(|(_, eps)| !eps.is_empty())
        .map(|(season, eps)| format!("S{season:02} {}", compress_episodes(eps)))
        .collect::<Vec<_>>()
        .join(", ")
}
