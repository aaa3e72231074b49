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

//! Drill-down navigation
//!
//! Navigation state is a slash-delimited path plus an optional selected row,
//! held in an injected [`NavigationStore`] (typically the URL query string).
//!
//! Path segments:
//!
//! - `explore`: the child span named `explore` (case-insensitive); when
//!   several children share the name, the group of all of them
//! - `explore-2`: the second `explore` child, in start-time order
//! - `@branch-1`: the first branch at the nearest enclosing fork
//!
//! Utility spans are never addressable, so `name-N` numbers the same spans a
//! swimlane row shows.
//!
//! Resolution never fails loudly: an unresolvable path yields `None` and
//! callers fall back to the root. Breadcrumbs degrade to the raw segment text
//! for anything past the first unresolvable segment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, TimelineError};
use crate::swimlane::{compute_branch_rows, compute_group_rows, compute_swimlane_rows_with, SwimlaneRow};
use crate::timeline::{Branch, Timeline, TimelineNode, TimelineSpan};

pub const PATH_SEPARATOR: char = '/';
pub const BRANCH_SEGMENT_PREFIX: &str = "@branch-";

/// A node a path can land on
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResolvedNode<'a> {
    Span(&'a TimelineSpan),
    Branch {
        branch: &'a Branch,
        /// 1-based index among the fork owner's branches
        index: usize,
        owner: &'a TimelineSpan,
    },
    /// Every visible sibling sharing `name`
    Group {
        name: &'a str,
        /// Content the members were found in
        siblings: &'a [TimelineNode],
    },
}

impl<'a> ResolvedNode<'a> {
    /// Content that child segments resolve against; for a group, the
    /// siblings, so `name-N` below it picks one member
    pub fn content(&self) -> &'a [TimelineNode] {
        match self {
            ResolvedNode::Span(span) => &span.content,
            ResolvedNode::Branch { branch, .. } => &branch.content,
            ResolvedNode::Group { siblings, .. } => *siblings,
        }
    }

    pub fn label(&self) -> String {
        match self {
            ResolvedNode::Span(span) => span.display_name(),
            ResolvedNode::Branch { index, .. } => format!("Branch {index}"),
            ResolvedNode::Group { .. } => {
                let members = self.members();
                let name = members.first().map(|span| span.display_name()).unwrap_or_default();
                format!("{name} ({})", members.len())
            }
        }
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        match self {
            ResolvedNode::Span(span) => span.start_time,
            ResolvedNode::Branch { branch, .. } => branch.start_time,
            ResolvedNode::Group { .. } => self
                .members()
                .iter()
                .map(|span| span.start_time)
                .min()
                .unwrap_or_default(),
        }
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        match self {
            ResolvedNode::Span(span) => span.end_time,
            ResolvedNode::Branch { branch, .. } => branch.end_time,
            ResolvedNode::Group { .. } => self
                .members()
                .iter()
                .map(|span| span.end_time)
                .max()
                .unwrap_or_default(),
        }
    }

    pub fn as_span(&self) -> Option<&'a TimelineSpan> {
        match self {
            ResolvedNode::Span(span) => Some(*span),
            _ => None,
        }
    }

    /// Spans this node stands for: the span itself, a group's members in
    /// start-time order, nothing for a branch
    pub fn members(&self) -> Vec<&'a TimelineSpan> {
        match self {
            ResolvedNode::Span(span) => vec![*span],
            ResolvedNode::Branch { .. } => Vec::new(),
            ResolvedNode::Group { name, siblings } => visible_named(*siblings, name),
        }
    }

    /// Swimlane rows for this node
    pub fn swimlane_rows(&self, tolerance_ms: i64) -> Vec<SwimlaneRow<'a>> {
        match self {
            ResolvedNode::Span(span) => compute_swimlane_rows_with(span, tolerance_ms),
            ResolvedNode::Branch { branch, .. } => compute_branch_rows(branch, tolerance_ms),
            ResolvedNode::Group { name, .. } => compute_group_rows(name, &self.members(), tolerance_ms),
        }
    }
}

/// One entry of the breadcrumb bar
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Breadcrumb {
    pub label: String,
    /// Path that navigates to this crumb
    pub path: String,
    /// False when the label is the raw segment of an unresolvable path
    pub resolved: bool,
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split(PATH_SEPARATOR)
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
}

/// `name-N` → `("name", N)` for N ≥ 1
fn split_index(segment: &str) -> Option<(&str, usize)> {
    let (name, index) = segment.rsplit_once('-')?;
    let index: usize = index.parse().ok()?;
    (index >= 1 && !name.is_empty()).then_some((name, index))
}

/// Non-utility child spans named `name`, in start-time order
fn visible_named<'a>(content: &'a [TimelineNode], name: &str) -> Vec<&'a TimelineSpan> {
    let mut named: Vec<&TimelineSpan> = content
        .iter()
        .filter_map(TimelineNode::as_span)
        .filter(|span| !span.utility && span.name.eq_ignore_ascii_case(name))
        .collect();
    named.sort_by_key(|span| (span.start_time, span.end_time));
    named
}

/// Child node matching a path segment
fn match_child<'a>(content: &'a [TimelineNode], segment: &str) -> Option<ResolvedNode<'a>> {
    let named = visible_named(content, segment);
    match named.as_slice() {
        [] => {}
        [only] => return Some(ResolvedNode::Span(*only)),
        [first, ..] => {
            let first: &'a TimelineSpan = *first;
            return Some(ResolvedNode::Group {
                name: first.name.as_str(),
                siblings: content,
            });
        }
    }

    let (name, index) = split_index(segment)?;
    visible_named(content, name)
        .get(index - 1)
        .copied()
        .map(ResolvedNode::Span)
}

/// Resolve one segment against the walk so far
fn step<'a>(trail: &[ResolvedNode<'a>], segment: &str) -> Option<ResolvedNode<'a>> {
    if let Some(index) = segment.strip_prefix(BRANCH_SEGMENT_PREFIX) {
        let index: usize = index.parse().ok()?;
        if index == 0 {
            return None;
        }
        // nearest span on the trail that owns branches
        let owner = trail
            .iter()
            .rev()
            .filter_map(ResolvedNode::as_span)
            .find(|span| !span.branches.is_empty())?;
        let branch = owner.branches.get(index - 1)?;
        return Some(ResolvedNode::Branch {
            branch,
            index,
            owner,
        });
    }

    let current = trail.last()?;
    match_child(current.content(), segment)
}

/// Resolve `path` from the root; `None` if any segment does not resolve
pub fn resolve_path<'a>(timeline: &'a Timeline, path: &str) -> Option<ResolvedNode<'a>> {
    let mut trail = vec![ResolvedNode::Span(&timeline.root)];
    for segment in segments(path) {
        let next = step(&trail, segment)?;
        trail.push(next);
    }
    trail.pop()
}

/// Breadcrumbs for `path`, root first; never empty
pub fn build_breadcrumbs(timeline: &Timeline, path: &str) -> Vec<Breadcrumb> {
    let mut crumbs = vec![Breadcrumb {
        label: timeline.root.display_name(),
        path: String::new(),
        resolved: true,
    }];

    let mut trail = vec![ResolvedNode::Span(&timeline.root)];
    let mut resolving = true;
    let mut walked: Vec<&str> = Vec::new();

    for segment in segments(path) {
        walked.push(segment);
        let next = if resolving { step(&trail, segment) } else { None };
        let label = match next {
            Some(node) => {
                trail.push(node);
                node.label()
            }
            None => {
                resolving = false;
                segment.to_string()
            }
        };
        crumbs.push(Breadcrumb {
            label,
            path: walked.join("/"),
            resolved: resolving,
        });
    }
    crumbs
}

/// Where navigation state is read from and written to
pub trait NavigationStore {
    fn path(&self) -> String;
    fn selected(&self) -> Option<String>;
    fn set(&mut self, path: String, selected: Option<String>);
}

/// Plain in-memory store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStore {
    path: String,
    selected: Option<String>,
}

impl MemoryStore {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            selected: None,
        }
    }
}

impl NavigationStore for MemoryStore {
    fn path(&self) -> String {
        self.path.clone()
    }

    fn selected(&self) -> Option<String> {
        self.selected.clone()
    }

    fn set(&mut self, path: String, selected: Option<String>) {
        self.path = path;
        self.selected = selected;
    }
}

/// Navigation state as carried in a URL query string
/// (`path=explore%2F%40branch-1&selected=plan-2`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryState {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected: Option<String>,
}

impl QueryState {
    /// Parse a query string, with or without the leading `?`
    pub fn parse(query: &str) -> Result<Self> {
        serde_urlencoded::from_str(query.trim_start_matches('?'))
            .map_err(|e| TimelineError::Query(e.to_string()))
    }

    pub fn to_query(&self) -> Result<String> {
        serde_urlencoded::to_string(self).map_err(|e| TimelineError::Query(e.to_string()))
    }
}

impl NavigationStore for QueryState {
    fn path(&self) -> String {
        self.path.clone()
    }

    fn selected(&self) -> Option<String> {
        self.selected.clone()
    }

    fn set(&mut self, path: String, selected: Option<String>) {
        self.path = path;
        self.selected = selected;
    }
}

/// Path segment for a child, with an index when it has same-named siblings
pub fn segment_for(name: &str, index: Option<usize>) -> String {
    match index {
        Some(index) => format!("{}-{}", name.to_lowercase(), index),
        None => name.to_lowercase(),
    }
}

/// Drill-down state machine over an injected store
#[derive(Debug, Clone, Default)]
pub struct Navigator<S: NavigationStore> {
    store: S,
}

impl<S: NavigationStore> Navigator<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn path(&self) -> String {
        self.store.path()
    }

    pub fn selected(&self) -> Option<String> {
        self.store.selected()
    }

    /// Enter a child; clears the selection
    pub fn drill_down(&mut self, name: &str, index: Option<usize>) {
        self.push_segment(segment_for(name, index));
    }

    /// Enter the Nth branch (1-based) of the nearest fork
    pub fn drill_into_branch(&mut self, index: usize) {
        self.push_segment(format!("{BRANCH_SEGMENT_PREFIX}{index}"));
    }

    fn push_segment(&mut self, segment: String) {
        let mut parts: Vec<String> = segments(&self.store.path()).map(str::to_string).collect();
        parts.push(segment);
        self.store.set(parts.join("/"), None);
    }

    /// Clear the selection if there is one, otherwise leave the current node
    pub fn go_up(&mut self) {
        let path = self.store.path();
        if self.store.selected().is_some() {
            self.store.set(path, None);
            return;
        }
        let mut parts: Vec<&str> = segments(&path).collect();
        parts.pop();
        self.store.set(parts.join("/"), None);
    }

    /// Select a row without changing the drill path
    pub fn select(&mut self, name: &str, index: Option<usize>) {
        let path = self.store.path();
        self.store.set(path, Some(segment_for(name, index)));
    }

    pub fn clear_selection(&mut self) {
        let path = self.store.path();
        self.store.set(path, None);
    }

    /// Replace the whole path; clears the selection
    pub fn navigate_to(&mut self, path: &str) {
        let normalized: Vec<&str> = segments(path).collect();
        self.store.set(normalized.join("/"), None);
    }

    /// Node for the current path, falling back to the root
    pub fn current<'a>(&self, timeline: &'a Timeline) -> ResolvedNode<'a> {
        let path = self.store.path();
        resolve_path(timeline, &path).unwrap_or_else(|| {
            debug!(path = %path, "navigation path did not resolve, showing root");
            ResolvedNode::Span(&timeline.root)
        })
    }

    pub fn breadcrumbs(&self, timeline: &Timeline) -> Vec<Breadcrumb> {
        build_breadcrumbs(timeline, &self.store.path())
    }

    /// Selected child span of the current node; `None` when the selection
    /// names a whole group
    pub fn selected_span<'a>(&self, timeline: &'a Timeline) -> Option<&'a TimelineSpan> {
        let selected = self.store.selected()?;
        match_child(self.current(timeline).content(), &selected)?.as_span()
    }
}
