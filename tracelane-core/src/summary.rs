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

//! Whole-run statistics and label formatting

use serde::Serialize;

use crate::event::EventKind;
use crate::timeline::{SpanType, Timeline, TimelineNode, TimelineSpan};

/// Counts and totals over a built timeline, branches included
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TimelineSummary {
    pub name: String,
    pub agent_spans: usize,
    pub utility_spans: usize,
    pub branches: usize,
    pub model_calls: usize,
    pub tool_calls: usize,
    pub errors: usize,
    pub compactions: usize,
    pub total_tokens: u64,
    pub duration_secs: f64,
    pub idle_secs: f64,
}

impl TimelineSummary {
    pub fn from_timeline(timeline: &Timeline) -> Self {
        let root = &timeline.root;
        let mut summary = Self {
            name: timeline.name.clone(),
            total_tokens: root.total_tokens,
            duration_secs: root.duration_ms() / 1000.0,
            idle_secs: root.idle_time,
            ..Self::default()
        };
        summary.visit_span(root);
        summary
    }

    /// Seconds the run spent doing something
    pub fn active_secs(&self) -> f64 {
        (self.duration_secs - self.idle_secs).max(0.0)
    }

    fn visit_span(&mut self, span: &TimelineSpan) {
        if span.utility {
            self.utility_spans += 1;
        } else if span.span_type == Some(SpanType::Agent) {
            self.agent_spans += 1;
        }
        self.branches += span.branches.len();

        self.visit_content(&span.content);
        for branch in &span.branches {
            self.visit_content(&branch.content);
        }
    }

    fn visit_content(&mut self, content: &[TimelineNode]) {
        for node in content {
            match node {
                TimelineNode::Span(span) => self.visit_span(span),
                TimelineNode::Event(event) => {
                    match &event.event.kind {
                        EventKind::Model(_) => self.model_calls += 1,
                        EventKind::Tool(_) => self.tool_calls += 1,
                        EventKind::Compaction(_) => self.compactions += 1,
                        _ => {}
                    }
                    if event.event.error_message().is_some() {
                        self.errors += 1;
                    }
                }
            }
        }
    }
}

/// `850ms`, `12.4s`, `3m 05s`, `1h 02m`
pub fn format_duration(secs: f64) -> String {
    if !secs.is_finite() || secs <= 0.0 {
        return "0s".to_string();
    }
    if secs < 1.0 {
        return format!("{}ms", (secs * 1000.0).round() as u64);
    }
    if secs < 60.0 {
        return format!("{secs:.1}s");
    }
    let whole = secs.round() as u64;
    let (hours, minutes, seconds) = (whole / 3600, (whole % 3600) / 60, whole % 60);
    if hours > 0 {
        format!("{hours}h {minutes:02}m")
    } else {
        format!("{minutes}m {seconds:02}s")
    }
}

/// `950`, `12.3k`, `4.5M`
pub fn format_tokens(tokens: u64) -> String {
    match tokens {
        0..=999 => tokens.to_string(),
        1_000..=999_999 => format!("{:.1}k", tokens as f64 / 1_000.0),
        _ => format!("{:.1}M", tokens as f64 / 1_000_000.0),
    }
}
