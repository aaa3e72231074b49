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

//! Span tree assembly
//!
//! Turns the flat event stream into a forest of span records. Spans and
//! events are stored in an arena and referenced by index, so the tree borrows
//! from the event slice instead of copying it.
//!
//! Parent resolution, in order:
//! 1. the span named by the event's `parent_id` (span begins) or `span_id`
//!    (everything else), when it has been seen
//! 2. the innermost open span
//! 3. the root
//!
//! Every `span_end` pops the open-span stack, whether or not its id matches
//! the top. Unbalanced streams still produce a tree; a `span_end` with no
//! matching begin is dropped.

use std::collections::HashMap;

use tracing::debug;

use crate::event::{Event, EventKind};

/// Reference into the span arena or the source event slice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeRef {
    Span(usize),
    Event(usize),
}

/// A span reconstructed from its begin/end events
#[derive(Debug, Clone)]
pub struct SpanRecord<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub declared_type: Option<&'a str>,
    pub parent_id: Option<&'a str>,
    pub begin: &'a Event,
    pub end: Option<&'a Event>,
    pub children: Vec<TreeRef>,
}

#[derive(Debug, Clone)]
pub struct SpanTree<'a> {
    events: &'a [Event],
    spans: Vec<SpanRecord<'a>>,
    roots: Vec<TreeRef>,
}

impl<'a> SpanTree<'a> {
    pub fn build(events: &'a [Event]) -> Self {
        let mut spans: Vec<SpanRecord<'a>> = Vec::new();
        let mut roots = Vec::new();
        let mut by_id: HashMap<&'a str, usize> = HashMap::new();
        let mut stack: Vec<usize> = Vec::new();

        for (index, event) in events.iter().enumerate() {
            match &event.kind {
                EventKind::SpanBegin(begin) => {
                    let slot = spans.len();
                    let parent = begin
                        .parent_id
                        .as_deref()
                        .and_then(|id| by_id.get(id).copied())
                        .or_else(|| stack.last().copied());

                    spans.push(SpanRecord {
                        id: &begin.id,
                        name: &begin.name,
                        declared_type: begin.span_type.as_deref(),
                        parent_id: begin.parent_id.as_deref(),
                        begin: event,
                        end: None,
                        children: Vec::new(),
                    });
                    match parent {
                        Some(parent) => spans[parent].children.push(TreeRef::Span(slot)),
                        None => roots.push(TreeRef::Span(slot)),
                    }
                    by_id.insert(&begin.id, slot);
                    stack.push(slot);
                }
                EventKind::SpanEnd(end) => {
                    match by_id.get(end.id.as_str()) {
                        Some(&slot) => spans[slot].end = Some(event),
                        None => debug!(span_id = %end.id, "dropping span_end with no matching span_begin"),
                    }
                    stack.pop();
                }
                _ => {
                    let owner = event
                        .span_id
                        .as_deref()
                        .and_then(|id| by_id.get(id).copied())
                        .or_else(|| stack.last().copied());
                    match owner {
                        Some(owner) => spans[owner].children.push(TreeRef::Event(index)),
                        None => roots.push(TreeRef::Event(index)),
                    }
                }
            }
        }

        Self {
            events,
            spans,
            roots,
        }
    }

    pub fn roots(&self) -> &[TreeRef] {
        &self.roots
    }

    pub fn span(&self, slot: usize) -> &SpanRecord<'a> {
        &self.spans[slot]
    }

    pub fn event(&self, index: usize) -> &'a Event {
        &self.events[index]
    }

    pub fn span_count(&self) -> usize {
        self.spans.len()
    }

    /// Whether any event below this span is a model call
    pub fn contains_model_events(&self, slot: usize) -> bool {
        self.spans[slot].children.iter().any(|child| match *child {
            TreeRef::Event(index) => self.events[index].as_model().is_some(),
            TreeRef::Span(child) => self.contains_model_events(child),
        })
    }
}
