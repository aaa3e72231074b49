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

//! Row layout
//!
//! Projects swimlane rows onto a `[0, 100]` percentage scale for a visible
//! window, decides which bars can be drilled into, and collects error,
//! compaction and branch markers down to a configurable depth.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TimelineError;
use crate::swimlane::{RowSpan, SwimlaneRow};
use crate::time_mapping::{LinearScale, TimeScale};
use crate::timeline::{TimelineNode, TimelineSpan};

/// How far below a row's spans markers are collected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerDepth {
    /// Only the row's own spans
    Direct,
    /// One level of child spans
    #[default]
    Children,
    /// All descendants
    Recursive,
}

impl FromStr for MarkerDepth {
    type Err = TimelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "direct" => Ok(MarkerDepth::Direct),
            "children" => Ok(MarkerDepth::Children),
            "recursive" => Ok(MarkerDepth::Recursive),
            other => Err(TimelineError::Config(format!("unknown marker depth '{other}'"))),
        }
    }
}

impl fmt::Display for MarkerDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MarkerDepth::Direct => "direct",
            MarkerDepth::Children => "children",
            MarkerDepth::Recursive => "recursive",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    Error,
    Compaction,
    Branch,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionedMarker {
    pub kind: MarkerKind,
    pub left: f64,
    pub timestamp: DateTime<Utc>,
    /// Event uuid (errors, compactions) or fork id (branches)
    pub reference: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionedSpan {
    pub name: String,
    pub span_ids: Vec<String>,
    pub left: f64,
    pub width: f64,
    pub drillable: bool,
    pub parallel: bool,
    /// 1-based position among same-named siblings, when the row has several;
    /// `None` for a parallel cluster, whose plain name resolves to the group
    pub drill_index: Option<usize>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowLayout {
    pub name: String,
    pub is_parent: bool,
    pub total_tokens: u64,
    pub spans: Vec<PositionedSpan>,
    pub markers: Vec<PositionedMarker>,
}

/// Layout rows against a linear visible window
pub fn compute_row_layouts(
    rows: &[SwimlaneRow<'_>],
    visible_start: DateTime<Utc>,
    visible_end: DateTime<Utc>,
    depth: MarkerDepth,
) -> Vec<RowLayout> {
    compute_row_layouts_scaled(rows, &LinearScale::new(visible_start, visible_end), depth)
}

/// Layout rows against any time scale
pub fn compute_row_layouts_scaled<S: TimeScale + ?Sized>(
    rows: &[SwimlaneRow<'_>],
    scale: &S,
    depth: MarkerDepth,
) -> Vec<RowLayout> {
    rows.iter().map(|row| layout_row(row, scale, depth)).collect()
}

fn layout_row<S: TimeScale + ?Sized>(row: &SwimlaneRow<'_>, scale: &S, depth: MarkerDepth) -> RowLayout {
    let indexed = !row.is_parent && row.span_count() > 1;
    let mut ordinal = 0;
    let mut spans = Vec::with_capacity(row.spans.len());

    for item in &row.spans {
        let left = scale.percent(item.start_time());
        let right = scale.percent(item.end_time()).max(left);
        spans.push(PositionedSpan {
            name: row.name.clone(),
            span_ids: item.spans().iter().map(|span| span.id.clone()).collect(),
            left,
            width: right - left,
            drillable: !row.is_parent && is_drillable(item),
            parallel: item.is_parallel(),
            drill_index: (indexed && !item.is_parallel()).then_some(ordinal + 1),
            start_time: item.start_time(),
            end_time: item.end_time(),
            total_tokens: item.total_tokens(),
        });
        ordinal += item.len();
    }

    let mut markers = Vec::new();
    for item in &row.spans {
        for span in item.spans() {
            collect_markers(span, depth, scale, &mut markers);
        }
    }
    markers.sort_by(|a, b| a.left.total_cmp(&b.left));

    RowLayout {
        name: row.name.clone(),
        is_parent: row.is_parent,
        total_tokens: row.total_tokens,
        spans,
        markers,
    }
}

/// Parallel clusters always drill; a single span drills when it is an agent
/// with non-utility child spans
fn is_drillable(item: &RowSpan<'_>) -> bool {
    match item {
        RowSpan::Parallel(_) => true,
        RowSpan::Single(span) => span.is_agent() && span.has_drillable_children(),
    }
}

fn collect_markers<S: TimeScale + ?Sized>(
    span: &TimelineSpan,
    depth: MarkerDepth,
    scale: &S,
    out: &mut Vec<PositionedMarker>,
) {
    for node in &span.content {
        match node {
            TimelineNode::Event(event) => {
                let reference = event.event.uuid.clone().unwrap_or_default();
                if let Some(message) = event.event.error_message() {
                    out.push(PositionedMarker {
                        kind: MarkerKind::Error,
                        left: scale.percent(event.start_time),
                        timestamp: event.start_time,
                        reference,
                        label: message.to_string(),
                    });
                } else if event.event.is_compaction() {
                    out.push(PositionedMarker {
                        kind: MarkerKind::Compaction,
                        left: scale.percent(event.start_time),
                        timestamp: event.start_time,
                        reference,
                        label: "Context compacted".to_string(),
                    });
                }
            }
            TimelineNode::Span(child) => match depth {
                MarkerDepth::Direct => {}
                MarkerDepth::Children => collect_markers(child, MarkerDepth::Direct, scale, out),
                MarkerDepth::Recursive => collect_markers(child, MarkerDepth::Recursive, scale, out),
            },
        }
    }

    let mut seen: Vec<&str> = Vec::new();
    for branch in &span.branches {
        let fork = branch.forked_at.as_str();
        if fork.is_empty() || seen.contains(&fork) {
            continue;
        }
        seen.push(fork);

        let Some(fork_event) = span.find_event(fork) else {
            continue;
        };
        let count = span.branches.iter().filter(|b| b.forked_at == fork).count();
        out.push(PositionedMarker {
            kind: MarkerKind::Branch,
            left: scale.percent(fork_event.start_time),
            timestamp: fork_event.start_time,
            reference: fork.to_string(),
            label: if count == 1 {
                "1 branch".to_string()
            } else {
                format!("{count} branches")
            },
        });
    }
}
