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

//! Flatten timeline content back into a plain event list
//!
//! Nested [`TimelineSpan`]s are re-wrapped in synthesized `span_begin` /
//! `span_end` events so that anything which consumes a transcript can consume
//! a selected region of the timeline the same way.
//!
//! Branches are left out unless [`RawEventOptions::include_branches`] is set.
//! When it is, each branch is re-emitted as a `branch`-typed span right after
//! its fork event (or at the end of the owner's content when the fork is not
//! among the owner's direct events), so a rebuild restores it as an explicit
//! branch.

use serde_json::json;

use crate::event::{Event, SpanBeginEvent, SpanEndEvent};
use crate::timeline::{Branch, SpanType, TimelineNode, TimelineSpan};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawEventOptions {
    /// Re-emit each span's branches as `branch` spans
    pub include_branches: bool,
}

/// Flatten `nodes` into events, in content order; branches are omitted
pub fn collect_raw_events(nodes: &[TimelineNode]) -> Vec<Event> {
    collect_raw_events_with(nodes, RawEventOptions::default())
}

pub fn collect_raw_events_with(nodes: &[TimelineNode], options: RawEventOptions) -> Vec<Event> {
    let mut out = Vec::new();
    collect_into(nodes, None, options, &mut out);
    out
}

/// Flatten a single span, including its own begin/end wrapper; branches are
/// omitted
pub fn collect_span_events(span: &TimelineSpan) -> Vec<Event> {
    collect_span_events_with(span, RawEventOptions::default())
}

pub fn collect_span_events_with(span: &TimelineSpan, options: RawEventOptions) -> Vec<Event> {
    let mut out = Vec::new();
    push_span(span, None, options, &mut out);
    out
}

fn collect_into(nodes: &[TimelineNode], parent: Option<&str>, options: RawEventOptions, out: &mut Vec<Event>) {
    for node in nodes {
        match node {
            TimelineNode::Event(event) => out.push(event.event.clone()),
            TimelineNode::Span(span) => push_span(span, parent, options, out),
        }
    }
}

fn push_span(span: &TimelineSpan, parent: Option<&str>, options: RawEventOptions, out: &mut Vec<Event>) {
    let mut begin = SpanBeginEvent::new(span.id.clone(), span.name.clone());
    if let Some(span_type) = span.span_type {
        begin = begin.with_type(span_type.as_str());
    }
    if let Some(parent) = parent {
        begin = begin.with_parent(parent);
    }
    if let Some(description) = &span.description {
        begin.metadata = Some(json!({ "description": description }));
    }

    out.push(Event::new(span.start_time, begin).with_span_id(span.id.clone()));

    let branches: &[Branch] = if options.include_branches { &span.branches } else { &[] };
    let mut placed = vec![false; branches.len()];
    for node in &span.content {
        match node {
            TimelineNode::Event(event) => out.push(event.event.clone()),
            TimelineNode::Span(child) => push_span(child, Some(&span.id), options, out),
        }

        let Some(uuid) = node.as_event().and_then(|event| event.uuid.as_deref()) else {
            continue;
        };
        for (index, branch) in branches.iter().enumerate() {
            if !placed[index] && branch.forked_at == uuid {
                push_branch(&span.id, index, branch, options, out);
                placed[index] = true;
            }
        }
    }
    for (index, branch) in branches.iter().enumerate() {
        if !placed[index] {
            push_branch(&span.id, index, branch, options, out);
        }
    }

    out.push(Event::new(span.end_time, SpanEndEvent::new(span.id.clone())).with_span_id(span.id.clone()));
}

fn push_branch(owner: &str, index: usize, branch: &Branch, options: RawEventOptions, out: &mut Vec<Event>) {
    let id = format!("{owner}-branch-{}", index + 1);
    let begin = SpanBeginEvent::new(id.clone(), "branch")
        .with_type(SpanType::Branch.as_str())
        .with_parent(owner);
    out.push(Event::new(branch.start_time, begin).with_span_id(id.clone()));

    for node in &branch.content {
        match node {
            // owned by the branch, whatever span the source event named
            TimelineNode::Event(event) => {
                let mut event = event.event.clone();
                event.span_id = Some(id.clone());
                out.push(event);
            }
            TimelineNode::Span(span) => push_span(span, Some(&id), options, out),
        }
    }

    out.push(Event::new(branch.end_time, SpanEndEvent::new(id.clone())).with_span_id(id));
}
