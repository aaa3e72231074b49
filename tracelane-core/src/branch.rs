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

//! Automatic reroll detection
//!
//! When a model is invoked twice with an identical conversation, the earlier
//! attempt was abandoned (a retry or reroll). Such attempts are moved out of
//! the trunk into [`Branch`]es so the trunk reads as the path actually taken.
//!
//! Detection works per span on its direct content:
//!
//! 1. content is split into regions at `compaction` events, since compaction
//!    replaces the prior context
//! 2. model calls in a region are grouped by input fingerprint
//! 3. each adjacent pair `(start, next)` in a group becomes a branch covering
//!    `[start, next)`; the last occurrence stays in the trunk
//! 4. the fork point is the trunk event that produced the shared input's
//!    last message
//!
//! Spans carrying authored branches are passed through untouched.

use std::collections::HashMap;
use std::ops::Range;

use tracing::{debug, trace};

use crate::error::Result;
use crate::event::{ChatMessage, Event, Role};
use crate::timeline::{Branch, SpanType, TimelineNode, TimelineSpan};

const ROLE_SEPARATOR: &str = ":";
const MESSAGE_SEPARATOR: &str = "\u{1e}";

/// Memoizes per-message serializations within one timeline build
///
/// Keyed by message id: the same message object recurs in the input of every
/// later model call in a conversation. Messages without an id are serialized
/// each time.
#[derive(Debug, Default)]
pub struct FingerprintCache {
    segments: HashMap<String, String>,
}

impl FingerprintCache {
    /// Fingerprint of a model input: a hash over `role:content` segments
    pub fn fingerprint(&mut self, input: &[ChatMessage]) -> String {
        let mut hasher = blake3::Hasher::new();
        for (position, message) in input.iter().enumerate() {
            if position > 0 {
                hasher.update(MESSAGE_SEPARATOR.as_bytes());
            }
            match &message.id {
                Some(id) => {
                    let segment = self
                        .segments
                        .entry(id.clone())
                        .or_insert_with(|| message_segment(message));
                    hasher.update(segment.as_bytes());
                }
                None => {
                    hasher.update(message_segment(message).as_bytes());
                }
            }
        }
        hasher.finalize().to_hex().to_string()
    }

    /// Number of cached message segments
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

fn message_segment(message: &ChatMessage) -> String {
    format!(
        "{}{}{}",
        message.role.as_str(),
        ROLE_SEPARATOR,
        message.content.to_stable_string()
    )
}

/// Detect rerolls in `span` and, recursively, in every span below it
pub fn detect_branches(span: &mut TimelineSpan, cache: &mut FingerprintCache) -> Result<()> {
    detect_in_descendants(span, cache)?;

    if !span.branches.is_empty()
        || matches!(span.span_type, Some(SpanType::Init | SpanType::Scorers))
    {
        return Ok(());
    }

    let ranges = find_branch_ranges(&span.content, cache);
    if ranges.is_empty() {
        return Ok(());
    }

    debug!(span_id = %span.id, branches = ranges.len(), "detected rerolled model turns");
    split_branches(span, &ranges)
}

/// Run detection on everything below `span` but not on `span` itself
pub(crate) fn detect_in_descendants(
    span: &mut TimelineSpan,
    cache: &mut FingerprintCache,
) -> Result<()> {
    for node in span.content.iter_mut() {
        if let TimelineNode::Span(child) = node {
            detect_branches(child, cache)?;
        }
    }
    for branch in span.branches.iter_mut() {
        for node in branch.content.iter_mut() {
            if let TimelineNode::Span(child) = node {
                detect_branches(child, cache)?;
            }
        }
        branch.refresh();
    }
    span.refresh();
    Ok(())
}

/// Split content into regions separated by compaction events
fn compaction_regions(content: &[TimelineNode]) -> Vec<Range<usize>> {
    let mut regions = Vec::new();
    let mut start = 0;
    for (index, node) in content.iter().enumerate() {
        if node.as_event().is_some_and(Event::is_compaction) {
            if start < index {
                regions.push(start..index);
            }
            start = index + 1;
        }
    }
    if start < content.len() {
        regions.push(start..content.len());
    }
    regions
}

/// Non-overlapping branch ranges in ascending order
fn find_branch_ranges(content: &[TimelineNode], cache: &mut FingerprintCache) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();

    for region in compaction_regions(content) {
        let mut groups: Vec<Vec<usize>> = Vec::new();
        let mut by_fingerprint: HashMap<String, usize> = HashMap::new();

        for index in region {
            let Some(model) = content[index].as_event().and_then(Event::as_model) else {
                continue;
            };
            if model.input.is_empty() {
                continue;
            }
            let fingerprint = cache.fingerprint(&model.input);
            let group = *by_fingerprint.entry(fingerprint).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[group].push(index);
        }

        for group in groups.iter().filter(|group| group.len() >= 2) {
            for pair in group.windows(2) {
                ranges.push(pair[0]..pair[1]);
            }
        }
    }

    ranges.sort_by_key(|range| (range.start, range.end));

    // rerolls of different turns can interleave; the earliest range wins
    let mut accepted: Vec<Range<usize>> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match accepted.last() {
            Some(last) if range.start < last.end => {
                trace!(start = range.start, end = range.end, "skipping overlapping reroll range");
            }
            _ => accepted.push(range),
        }
    }
    accepted
}

/// Uuid of the trunk event that produced the last message of the input
/// shared by the model call at `start`
fn resolve_fork(content: &[TimelineNode], start: usize, removed: &[Range<usize>]) -> String {
    let Some(last) = content[start]
        .as_event()
        .and_then(Event::as_model)
        .and_then(|model| model.input.last())
    else {
        return String::new();
    };

    let trunk = move || {
        content[..start]
            .iter()
            .enumerate()
            .rev()
            .filter(move |(index, _)| !removed.iter().any(|range| range.contains(index)))
            .filter_map(|(_, node)| node.as_event())
    };

    let fork = match last.role {
        Role::Tool => last.tool_call_id.as_deref().and_then(|call_id| {
            trunk().find(|event| event.as_tool().is_some_and(|tool| tool.id == call_id))
        }),
        Role::Assistant => {
            let output = |event: &Event| event.as_model().and_then(|model| model.output_message().cloned());
            let by_id = last.id.as_deref().and_then(|id| {
                trunk().find(|event| output(event).is_some_and(|message| message.id.as_deref() == Some(id)))
            });
            by_id.or_else(|| {
                trunk().find(|event| output(event).is_some_and(|message| message.content == last.content))
            })
        }
        Role::System | Role::User => None,
    };

    match fork.and_then(|event| event.uuid.clone()) {
        Some(uuid) => uuid,
        None => {
            trace!(index = start, "fork point not resolvable");
            String::new()
        }
    }
}

/// Move `ranges` out of the span's content into new branches
fn split_branches(span: &mut TimelineSpan, ranges: &[Range<usize>]) -> Result<()> {
    let forks: Vec<String> = ranges
        .iter()
        .map(|range| resolve_fork(&span.content, range.start, ranges))
        .collect();

    let mut trunk = Vec::with_capacity(span.content.len());
    let mut parts: Vec<Vec<TimelineNode>> = ranges.iter().map(|_| Vec::new()).collect();
    for (index, node) in std::mem::take(&mut span.content).into_iter().enumerate() {
        match ranges.iter().position(|range| range.contains(&index)) {
            Some(slot) => parts[slot].push(node),
            None => trunk.push(node),
        }
    }

    span.content = trunk;
    for (forked_at, part) in forks.into_iter().zip(parts) {
        span.branches.push(Branch::new(forked_at, part)?);
    }
    span.refresh();
    Ok(())
}
