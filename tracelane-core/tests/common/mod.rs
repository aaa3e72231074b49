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


//! Event-stream builders shared by the integration tests

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use tracelane_core::event::{
    ChatMessage, CompactionEvent, Event, ModelEvent, SpanBeginEvent, SpanEndEvent, ToolEvent,
};
use tracelane_core::timeline::{TimelineNode, TimelineSpan};

pub fn at(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::milliseconds(ms)
}

pub fn begin(id: &str, name: &str, span_type: Option<&str>, ms: i64) -> Event {
    let mut begin = SpanBeginEvent::new(id, name);
    if let Some(span_type) = span_type {
        begin = begin.with_type(span_type);
    }
    Event::new(at(ms), begin).with_uuid(format!("begin-{id}"))
}

pub fn end(id: &str, ms: i64) -> Event {
    Event::new(at(ms), SpanEndEvent::new(id)).with_uuid(format!("end-{id}"))
}

pub fn model(uuid: &str, ms: i64, duration_ms: i64, input: Vec<ChatMessage>, tokens: u64) -> Event {
    Event::new(
        at(ms),
        ModelEvent::new("gpt-4o", input)
            .with_output(ChatMessage::assistant(&format!("reply {uuid}")).with_id(format!("out-{uuid}")))
            .with_usage(tokens, 0)
            .completed_at(at(ms + duration_ms)),
    )
    .with_uuid(uuid)
}

pub fn tool(uuid: &str, call_id: &str, ms: i64, duration_ms: i64) -> Event {
    Event::new(at(ms), ToolEvent::new(call_id, "bash").completed_at(at(ms + duration_ms)))
        .with_uuid(uuid)
}

pub fn failing_tool(uuid: &str, ms: i64) -> Event {
    Event::new(
        at(ms),
        ToolEvent::new(format!("call-{uuid}"), "bash")
            .with_error("timeout", "command timed out")
            .completed_at(at(ms + 50)),
    )
    .with_uuid(uuid)
}

pub fn compaction(uuid: &str, ms: i64) -> Event {
    Event::new(at(ms), CompactionEvent::default()).with_uuid(uuid)
}

pub fn prompt(system: &str, task: &str) -> Vec<ChatMessage> {
    vec![ChatMessage::system(system), ChatMessage::user(task)]
}

/// Every leaf event in the tree, branches included
pub fn leaf_events(span: &TimelineSpan) -> Vec<&Event> {
    let mut out = Vec::new();
    push_leaves(&span.content, &mut out);
    for branch in &span.branches {
        push_leaves(&branch.content, &mut out);
    }
    out
}

fn push_leaves<'a>(content: &'a [TimelineNode], out: &mut Vec<&'a Event>) {
    for node in content {
        match node {
            TimelineNode::Event(event) => out.push(&event.event),
            TimelineNode::Span(span) => out.extend(leaf_events(span)),
        }
    }
}

/// Visit a span and every span below it, branches included
pub fn walk_spans<'a>(span: &'a TimelineSpan, visit: &mut dyn FnMut(&'a TimelineSpan)) {
    visit(span);
    let nested = span
        .content
        .iter()
        .chain(span.branches.iter().flat_map(|branch| branch.content.iter()));
    for node in nested {
        if let TimelineNode::Span(child) = node {
            walk_spans(child, visit);
        }
    }
}
