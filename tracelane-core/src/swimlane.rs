// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Swimlane rows
//!
//! Row 0 is always the drilled-into node itself. The remaining rows group the
//! node's non-utility child spans by name; within a row, spans that overlap
//! (allowing [`DEFAULT_OVERLAP_TOLERANCE_MS`] of slack) are clustered into a
//! parallel group.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

use crate::config::{DEFAULT_OVERLAP_TOLERANCE_MS, MAX_OVERLAP_TOLERANCE_MS};
use crate::timeline::{Branch, TimelineNode, TimelineSpan};

/// One item in a row
#[derive(Debug, Clone, PartialEq)]
pub enum RowSpan<'a> {
    Single(&'a TimelineSpan),
    /// Co-occurring spans sharing the row's name
    Parallel(Vec<&'a TimelineSpan>),
}

impl<'a> RowSpan<'a> {
    pub fn spans(&self) -> Vec<&'a TimelineSpan> {
        match self {
            RowSpan::Single(span) => vec![*span],
            RowSpan::Parallel(spans) => spans.clone(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RowSpan::Single(_) => 1,
            RowSpan::Parallel(spans) => spans.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_parallel(&self) -> bool {
        matches!(self, RowSpan::Parallel(_))
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        match self {
            RowSpan::Single(span) => span.start_time,
            RowSpan::Parallel(spans) => spans
                .iter()
                .map(|span| span.start_time)
                .min()
                .unwrap_or_default(),
        }
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        match self {
            RowSpan::Single(span) => span.end_time,
            RowSpan::Parallel(spans) => spans
                .iter()
                .map(|span| span.end_time)
                .max()
                .unwrap_or_default(),
        }
    }

    pub fn total_tokens(&self) -> u64 {
        match self {
            RowSpan::Single(span) => span.total_tokens,
            RowSpan::Parallel(spans) => spans.iter().map(|span| span.total_tokens).sum(),
        }
    }
}

/// One horizontal track
#[derive(Debug, Clone, PartialEq)]
pub struct SwimlaneRow<'a> {
    pub name: String,
    pub spans: Vec<RowSpan<'a>>,
    pub total_tokens: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Row 0: the node being viewed
    pub is_parent: bool,
}

impl<'a> SwimlaneRow<'a> {
    fn from_items(name: String, spans: Vec<RowSpan<'a>>, is_parent: bool) -> Self {
        let start_time = spans.iter().map(RowSpan::start_time).min().unwrap_or_default();
        let end_time = spans.iter().map(RowSpan::end_time).max().unwrap_or_default();
        let total_tokens = spans.iter().map(RowSpan::total_tokens).sum();
        Self {
            name,
            spans,
            total_tokens,
            start_time,
            end_time,
            is_parent,
        }
    }

    /// Name with the first letter re-capitalized
    pub fn display_name(&self) -> String {
        let mut chars = self.name.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }

    /// Number of spans across all items
    pub fn span_count(&self) -> usize {
        self.spans.iter().map(RowSpan::len).sum()
    }
}

/// Rows for a span with the default overlap tolerance
pub fn compute_swimlane_rows(node: &TimelineSpan) -> Vec<SwimlaneRow<'_>> {
    compute_swimlane_rows_with(node, DEFAULT_OVERLAP_TOLERANCE_MS)
}

pub fn compute_swimlane_rows_with(node: &TimelineSpan, tolerance_ms: i64) -> Vec<SwimlaneRow<'_>> {
    let mut rows = vec![SwimlaneRow::from_items(
        node.name.clone(),
        vec![RowSpan::Single(node)],
        true,
    )];
    rows.extend(child_rows(&node.content, tolerance_ms));
    rows
}

/// Rows for a branch: a branch has no bar of its own, so only child rows
pub fn compute_branch_rows(branch: &Branch, tolerance_ms: i64) -> Vec<SwimlaneRow<'_>> {
    child_rows(&branch.content, tolerance_ms)
}

/// Rows for a group of same-named siblings
///
/// The parent row holds the whole group, clustered as in a regular row. Each
/// member then gets its own row, named by the `name-N` path segment that
/// reaches it.
pub fn compute_group_rows<'a>(
    name: &str,
    members: &[&'a TimelineSpan],
    tolerance_ms: i64,
) -> Vec<SwimlaneRow<'a>> {
    let name = name.to_lowercase();
    let mut members = members.to_vec();
    members.sort_by_key(|span| (span.start_time, span.end_time));

    let mut rows = vec![SwimlaneRow::from_items(
        name.clone(),
        cluster(members.clone(), overlap_tolerance(tolerance_ms)),
        true,
    )];
    rows.extend(members.into_iter().enumerate().map(|(index, member)| {
        SwimlaneRow::from_items(format!("{name}-{}", index + 1), vec![RowSpan::Single(member)], false)
    }));
    rows
}

fn overlap_tolerance(tolerance_ms: i64) -> Duration {
    Duration::milliseconds(tolerance_ms.clamp(0, MAX_OVERLAP_TOLERANCE_MS))
}

fn child_rows(content: &[TimelineNode], tolerance_ms: i64) -> Vec<SwimlaneRow<'_>> {
    let mut groups: BTreeMap<String, Vec<&TimelineSpan>> = BTreeMap::new();
    for span in content.iter().filter_map(TimelineNode::as_span) {
        if span.utility {
            continue;
        }
        groups.entry(span.name.to_lowercase()).or_default().push(span);
    }

    let tolerance = overlap_tolerance(tolerance_ms);
    let mut rows: Vec<SwimlaneRow<'_>> = groups
        .into_iter()
        .map(|(name, spans)| SwimlaneRow::from_items(name, cluster(spans, tolerance), false))
        .collect();

    rows.sort_by(|a, b| {
        (a.start_time, a.end_time)
            .cmp(&(b.start_time, b.end_time))
            .then_with(|| a.name.cmp(&b.name))
    });
    rows
}

/// Partition same-named spans into overlap clusters
///
/// A span opens a new cluster when it starts at or after the running cluster
/// end plus `tolerance`.
fn cluster(mut spans: Vec<&TimelineSpan>, tolerance: Duration) -> Vec<RowSpan<'_>> {
    spans.sort_by_key(|span| (span.start_time, span.end_time));

    let mut clusters: Vec<Vec<&TimelineSpan>> = Vec::new();
    let mut cluster_end: Option<DateTime<Utc>> = None;
    for span in spans {
        match (clusters.last_mut(), cluster_end) {
            (Some(current), Some(end)) if span.start_time < end + tolerance => {
                current.push(span);
                cluster_end = Some(end.max(span.end_time));
            }
            _ => {
                clusters.push(vec![span]);
                cluster_end = Some(span.end_time);
            }
        }
    }

    clusters
        .into_iter()
        .map(|mut members| {
            if members.len() == 1 {
                RowSpan::Single(members.remove(0))
            } else {
                RowSpan::Parallel(members)
            }
        })
        .collect()
}
