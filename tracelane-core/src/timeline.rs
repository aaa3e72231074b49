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

//! Timeline tree types
//!
//! A [`Timeline`] is a tree of [`TimelineSpan`]s whose content is a mix of
//! leaf [`TimelineEvent`]s and nested spans, with alternate attempts hung off
//! each span as [`Branch`]es. Aggregates (time bounds, tokens, idle time) are
//! computed once at construction from content and never mutated by readers.
//!
//! # Idle time
//!
//! For content `C` spanning `wall` ms:
//!
//! ```text
//! idle = max(0, (wall - Σ (duration(c) - idle(c))) / 1000)   seconds
//! ```
//!
//! Leaf events contribute their full duration as active time.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Result, TimelineError};
use crate::event::Event;

/// Milliseconds from `start` to `end` (negative if `end` precedes `start`)
pub fn millis_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    let delta = end - start;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1000.0,
        None => delta.num_milliseconds() as f64,
    }
}

/// Classification of a timeline span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanType {
    Agent,
    Tool,
    Scorers,
    Init,
    Branch,
}

impl SpanType {
    /// Map a declared `span_begin` type onto the closed set
    pub fn from_declared(declared: Option<&str>) -> Option<Self> {
        match declared?.to_ascii_lowercase().as_str() {
            "agent" | "solver" => Some(SpanType::Agent),
            "tool" => Some(SpanType::Tool),
            "scorers" => Some(SpanType::Scorers),
            "init" => Some(SpanType::Init),
            "branch" => Some(SpanType::Branch),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SpanType::Agent => "agent",
            SpanType::Tool => "tool",
            SpanType::Scorers => "scorers",
            SpanType::Init => "init",
            SpanType::Branch => "branch",
        }
    }
}

/// Leaf wrapper around one source event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineEvent {
    pub event: Event,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub total_tokens: u64,
}

impl TimelineEvent {
    pub fn new(event: Event) -> Self {
        Self {
            start_time: event.timestamp,
            end_time: event.end_time(),
            total_tokens: event.total_tokens(),
            event,
        }
    }
}

/// Content item of a span or branch
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimelineNode {
    Event(TimelineEvent),
    Span(TimelineSpan),
}

impl TimelineNode {
    pub fn start_time(&self) -> DateTime<Utc> {
        match self {
            TimelineNode::Event(event) => event.start_time,
            TimelineNode::Span(span) => span.start_time,
        }
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        match self {
            TimelineNode::Event(event) => event.end_time,
            TimelineNode::Span(span) => span.end_time,
        }
    }

    pub fn total_tokens(&self) -> u64 {
        match self {
            TimelineNode::Event(event) => event.total_tokens,
            TimelineNode::Span(span) => span.total_tokens,
        }
    }

    /// Idle seconds; always zero for leaf events
    pub fn idle_time(&self) -> f64 {
        match self {
            TimelineNode::Event(_) => 0.0,
            TimelineNode::Span(span) => span.idle_time,
        }
    }

    pub fn duration_ms(&self) -> f64 {
        millis_between(self.start_time(), self.end_time())
    }

    pub fn as_event(&self) -> Option<&Event> {
        match self {
            TimelineNode::Event(event) => Some(&event.event),
            TimelineNode::Span(_) => None,
        }
    }

    pub fn as_span(&self) -> Option<&TimelineSpan> {
        match self {
            TimelineNode::Span(span) => Some(span),
            TimelineNode::Event(_) => None,
        }
    }
}

impl From<Event> for TimelineNode {
    fn from(event: Event) -> Self {
        TimelineNode::Event(TimelineEvent::new(event))
    }
}

/// Aggregates shared by spans and branches
#[derive(Debug, Clone, Copy)]
struct Aggregates {
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    total_tokens: u64,
    idle_time: f64,
}

fn aggregate(content: &[TimelineNode]) -> Option<Aggregates> {
    let first = content.first()?;
    let mut start_time = first.start_time();
    let mut end_time = first.end_time();
    let mut total_tokens = 0;
    let mut active_ms = 0.0;

    for node in content {
        start_time = start_time.min(node.start_time());
        end_time = end_time.max(node.end_time());
        total_tokens += node.total_tokens();
        active_ms += node.duration_ms() - node.idle_time() * 1000.0;
    }

    let wall_ms = millis_between(start_time, end_time);
    let idle_time = ((wall_ms - active_ms) / 1000.0).max(0.0);

    Some(Aggregates {
        start_time,
        end_time,
        total_tokens,
        idle_time,
    })
}

/// A bounded region of execution with nested content
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineSpan {
    pub id: String,
    /// Lower-cased for stable grouping; see [`TimelineSpan::display_name`]
    pub name: String,
    pub span_type: Option<SpanType>,
    pub content: Vec<TimelineNode>,
    pub branches: Vec<Branch>,
    pub utility: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub total_tokens: u64,
    pub idle_time: f64,
}

impl TimelineSpan {
    /// Build a span from non-empty content
    ///
    /// Callers must elide empty spans before getting here; empty content is
    /// reported as [`TimelineError::EmptySpan`].
    pub fn new(
        id: impl Into<String>,
        name: &str,
        span_type: Option<SpanType>,
        content: Vec<TimelineNode>,
    ) -> Result<Self> {
        let id = id.into();
        let Some(agg) = aggregate(&content) else {
            return Err(TimelineError::EmptySpan { id });
        };

        Ok(Self {
            id,
            name: name.to_lowercase(),
            span_type,
            content,
            branches: Vec::new(),
            utility: false,
            description: None,
            start_time: agg.start_time,
            end_time: agg.end_time,
            total_tokens: agg.total_tokens,
            idle_time: agg.idle_time,
        })
    }

    pub fn with_branches(mut self, branches: Vec<Branch>) -> Self {
        self.branches = branches;
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    /// Recompute aggregates after content changed
    pub(crate) fn refresh(&mut self) {
        if let Some(agg) = aggregate(&self.content) {
            self.start_time = agg.start_time;
            self.end_time = agg.end_time;
            self.total_tokens = agg.total_tokens;
            self.idle_time = agg.idle_time;
        }
    }

    /// Name with the first letter re-capitalized, for labels
    pub fn display_name(&self) -> String {
        let mut chars = self.name.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }

    pub fn duration_ms(&self) -> f64 {
        millis_between(self.start_time, self.end_time)
    }

    /// Spans directly in this span's content
    pub fn child_spans(&self) -> impl Iterator<Item = &TimelineSpan> {
        self.content.iter().filter_map(TimelineNode::as_span)
    }

    /// Declared agents, and tool spans promoted to agents; false for the
    /// init and scoring pseudo-spans
    pub fn is_agent(&self) -> bool {
        matches!(self.span_type, Some(SpanType::Agent | SpanType::Tool))
    }

    pub fn has_drillable_children(&self) -> bool {
        self.child_spans().any(|child| !child.utility)
    }

    /// Find an event by uuid anywhere below this span, branches included
    pub fn find_event(&self, uuid: &str) -> Option<&TimelineEvent> {
        find_event_in(&self.content, uuid).or_else(|| {
            self.branches
                .iter()
                .find_map(|branch| find_event_in(&branch.content, uuid))
        })
    }
}

fn find_event_in<'a>(content: &'a [TimelineNode], uuid: &str) -> Option<&'a TimelineEvent> {
    content.iter().find_map(|node| match node {
        TimelineNode::Event(event) if event.event.uuid.as_deref() == Some(uuid) => Some(event),
        TimelineNode::Event(_) => None,
        TimelineNode::Span(span) => span.find_event(uuid),
    })
}

/// An alternate attempt diverging from the trunk at `forked_at`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename = "branch")]
pub struct Branch {
    /// Uuid of the shared ancestor event, or "" when it could not be resolved
    pub forked_at: String,
    pub content: Vec<TimelineNode>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub total_tokens: u64,
    pub idle_time: f64,
}

impl Branch {
    pub fn new(forked_at: impl Into<String>, content: Vec<TimelineNode>) -> Result<Self> {
        let forked_at = forked_at.into();
        let Some(agg) = aggregate(&content) else {
            return Err(TimelineError::EmptyBranch { forked_at });
        };

        Ok(Self {
            forked_at,
            content,
            start_time: agg.start_time,
            end_time: agg.end_time,
            total_tokens: agg.total_tokens,
            idle_time: agg.idle_time,
        })
    }

    pub(crate) fn refresh(&mut self) {
        if let Some(agg) = aggregate(&self.content) {
            self.start_time = agg.start_time;
            self.end_time = agg.end_time;
            self.total_tokens = agg.total_tokens;
            self.idle_time = agg.idle_time;
        }
    }

    pub fn child_spans(&self) -> impl Iterator<Item = &TimelineSpan> {
        self.content.iter().filter_map(TimelineNode::as_span)
    }
}

/// A whole run, rooted at one span
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Timeline {
    pub name: String,
    pub description: String,
    pub root: TimelineSpan,
}
