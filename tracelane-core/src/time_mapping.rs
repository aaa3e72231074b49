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

//! Time scales for bar placement
//!
//! [`LinearScale`] maps a visible window straight onto `[0, 100]`.
//! [`TimeMapping`] is piecewise: stretches where the node's content is active
//! keep their real length, and idle gaps longer than a threshold are squeezed
//! to a fixed display length, so a long pause between two phases does not
//! push everything else into a sliver.

use chrono::{DateTime, Utc};

use crate::timeline::{millis_between, Branch, TimelineNode, TimelineSpan};

/// Maps a timestamp to a horizontal percentage
pub trait TimeScale {
    /// Position in `[0, 100]`; monotonic non-decreasing in `at`
    fn percent(&self, at: DateTime<Utc>) -> f64;
}

/// Linear projection of a visible window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearScale {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl LinearScale {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }
}

impl TimeScale for LinearScale {
    fn percent(&self, at: DateTime<Utc>) -> f64 {
        let range = millis_between(self.start, self.end);
        if range <= 0.0 {
            return 0.0;
        }
        (millis_between(self.start, at) / range * 100.0).clamp(0.0, 100.0)
    }
}

/// An active stretch, in ms offsets from the mapping origin
#[derive(Debug, Clone, Copy, PartialEq)]
struct Segment {
    start: f64,
    end: f64,
    display_start: f64,
}

/// Gap-compressed piecewise mapping over a node's active intervals
#[derive(Debug, Clone, PartialEq)]
pub struct TimeMapping {
    origin: DateTime<Utc>,
    segments: Vec<Segment>,
    display_total: f64,
    compressed_gaps: usize,
}

impl TimeMapping {
    /// Mapping over a span's direct content
    pub fn for_span(span: &TimelineSpan, threshold_ms: i64, compressed_ms: i64) -> Self {
        Self::from_content(span.start_time, &span.content, threshold_ms, compressed_ms)
    }

    /// Mapping over a branch's content
    pub fn for_branch(branch: &Branch, threshold_ms: i64, compressed_ms: i64) -> Self {
        Self::from_content(branch.start_time, &branch.content, threshold_ms, compressed_ms)
    }

    fn from_content(
        origin: DateTime<Utc>,
        content: &[TimelineNode],
        threshold_ms: i64,
        compressed_ms: i64,
    ) -> Self {
        let mut intervals: Vec<(f64, f64)> = content
            .iter()
            .map(|node| {
                let start = millis_between(origin, node.start_time());
                let end = millis_between(origin, node.end_time()).max(start);
                (start, end)
            })
            .collect();
        intervals.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));

        let mut merged: Vec<(f64, f64)> = Vec::with_capacity(intervals.len());
        for (start, end) in intervals {
            match merged.last_mut() {
                Some(last) if start <= last.1 => last.1 = last.1.max(end),
                _ => merged.push((start, end)),
            }
        }

        let threshold = threshold_ms as f64;
        let compressed = compressed_ms as f64;
        let mut segments = Vec::with_capacity(merged.len());
        let mut cursor = 0.0;
        let mut compressed_gaps = 0;
        let mut previous_end: Option<f64> = None;

        for (start, end) in merged {
            if let Some(previous_end) = previous_end {
                let gap = start - previous_end;
                if gap > threshold {
                    cursor += compressed;
                    compressed_gaps += 1;
                } else {
                    cursor += gap;
                }
            }
            segments.push(Segment {
                start,
                end,
                display_start: cursor,
            });
            cursor += end - start;
            previous_end = Some(end);
        }

        Self {
            origin,
            segments,
            display_total: cursor,
            compressed_gaps,
        }
    }

    /// Length of the compressed timeline in ms
    pub fn display_duration_ms(&self) -> f64 {
        self.display_total
    }

    pub fn compressed_gaps(&self) -> usize {
        self.compressed_gaps
    }

    fn display_offset(&self, at: f64) -> f64 {
        let Some(first) = self.segments.first() else {
            return 0.0;
        };
        if at <= first.start {
            return 0.0;
        }

        let mut previous: Option<&Segment> = None;
        for segment in &self.segments {
            if at < segment.start {
                // inside the gap before `segment`
                if let Some(prev) = previous {
                    let prev_display_end = prev.display_start + (prev.end - prev.start);
                    let gap = segment.start - prev.end;
                    let display_gap = segment.display_start - prev_display_end;
                    if gap <= 0.0 {
                        return segment.display_start;
                    }
                    return prev_display_end + (at - prev.end) / gap * display_gap;
                }
                return 0.0;
            }
            if at <= segment.end {
                return segment.display_start + (at - segment.start);
            }
            previous = Some(segment);
        }
        self.display_total
    }
}

impl TimeScale for TimeMapping {
    fn percent(&self, at: DateTime<Utc>) -> f64 {
        if self.display_total <= 0.0 {
            return 0.0;
        }
        let offset = self.display_offset(millis_between(self.origin, at));
        (offset / self.display_total * 100.0).clamp(0.0, 100.0)
    }
}
