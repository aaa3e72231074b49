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


//! Structural properties of timelines built from arbitrary event streams

mod common;

use std::collections::HashSet;

use common::*;
use proptest::prelude::*;
use tracelane_core::event::{Event, EventKind};
use tracelane_core::layout::{compute_row_layouts, MarkerDepth};
use tracelane_core::swimlane::{compute_swimlane_rows, compute_swimlane_rows_with, RowSpan};
use tracelane_core::timeline::{Branch, SpanType, TimelineNode, TimelineSpan};
use tracelane_core::{build_timeline, TimelineError};

const NAMES: [&str; 3] = ["explore", "plan", "bash"];
const TASKS: [&str; 3] = ["inspect", "patch", "verify"];
const SPAN_TYPES: [Option<&str>; 4] = [None, Some("agent"), Some("tool"), Some("branch")];

#[derive(Debug, Clone)]
enum Op {
    Open { name: usize, kind: usize },
    Close,
    Model { task: usize, tokens: u64, duration: i64 },
    Tool { duration: i64 },
    Compact,
    StrayEnd,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        2 => (0..NAMES.len(), 0..SPAN_TYPES.len()).prop_map(|(name, kind)| Op::Open { name, kind }),
        2 => Just(Op::Close),
        4 => (0..TASKS.len(), 0..1_000u64, 1..3_000i64)
            .prop_map(|(task, tokens, duration)| Op::Model { task, tokens, duration }),
        2 => (1..500i64).prop_map(|duration| Op::Tool { duration }),
        1 => Just(Op::Compact),
        1 => Just(Op::StrayEnd),
    ]
}

/// Render ops as a time-ordered stream; every leaf gets a unique uuid
fn stream(ops: &[(Op, i64)]) -> Vec<Event> {
    let mut events = Vec::new();
    let mut open: Vec<String> = Vec::new();
    let mut clock = 0;

    for (index, (op, gap)) in ops.iter().enumerate() {
        clock += gap;
        match op {
            Op::Open { name, kind } => {
                let id = format!("s{index}");
                events.push(begin(&id, NAMES[*name], SPAN_TYPES[*kind], clock));
                open.push(id);
            }
            Op::Close => {
                if let Some(id) = open.pop() {
                    events.push(end(&id, clock));
                }
            }
            Op::Model { task, tokens, duration } => {
                let uuid = format!("e{index}");
                events.push(model(&uuid, clock, *duration, prompt("sys", TASKS[*task]), *tokens));
                clock += duration;
            }
            Op::Tool { duration } => {
                let uuid = format!("e{index}");
                events.push(tool(&uuid, &format!("call-{index}"), clock, *duration));
                clock += duration;
            }
            Op::Compact => events.push(compaction(&format!("e{index}"), clock)),
            Op::StrayEnd => events.push(end("ghost", clock)),
        }
    }
    while let Some(id) = open.pop() {
        events.push(end(&id, clock));
    }
    events
}

fn ops() -> impl Strategy<Value = Vec<(Op, i64)>> {
    prop::collection::vec((op(), 0..5_000i64), 1..48)
}

/// Streams with no leaf events at all
fn marker_ops() -> impl Strategy<Value = Vec<(Op, i64)>> {
    let marker = prop_oneof![
        (0..NAMES.len(), 0..SPAN_TYPES.len()).prop_map(|(name, kind)| Op::Open { name, kind }),
        Just(Op::Close),
        Just(Op::StrayEnd),
    ];
    prop::collection::vec((marker, 0..5_000i64), 1..24)
}

fn is_stray_end(event: &Event) -> bool {
    event.uuid.as_deref() == Some("end-ghost")
}

fn is_marker(event: &Event) -> bool {
    matches!(event.kind, EventKind::SpanBegin(_) | EventKind::SpanEnd(_))
}

fn check_aggregates(content: &[TimelineNode], total: u64, idle: f64) -> Result<(), TestCaseError> {
    let sum: u64 = content.iter().map(TimelineNode::total_tokens).sum();
    prop_assert_eq!(total, sum);
    prop_assert!(idle >= 0.0);
    Ok(())
}

fn check_span(span: &TimelineSpan) -> Result<(), TestCaseError> {
    prop_assert!(!span.content.is_empty());
    prop_assert!(span.start_time <= span.end_time);
    check_aggregates(&span.content, span.total_tokens, span.idle_time)?;
    for node in &span.content {
        prop_assert!(node.start_time() >= span.start_time);
        prop_assert!(node.end_time() <= span.end_time);
    }
    for branch in &span.branches {
        check_branch(branch)?;
    }
    Ok(())
}

fn check_branch(branch: &Branch) -> Result<(), TestCaseError> {
    prop_assert!(!branch.content.is_empty());
    check_aggregates(&branch.content, branch.total_tokens, branch.idle_time)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_tree_invariants(ops in ops()) {
        let events = stream(&ops);
        let timeline = match build_timeline(&events) {
            Ok(timeline) => timeline,
            Err(TimelineError::EmptyTranscript) => {
                prop_assert!(events.iter().all(is_stray_end));
                return Ok(());
            }
            Err(other) => return Err(TestCaseError::fail(other.to_string())),
        };

        let mut spans = Vec::new();
        walk_spans(&timeline.root, &mut |span| spans.push(span));
        for span in &spans {
            check_span(span)?;
        }

        // every non-marker event survives exactly once
        let expected: Vec<&str> = events
            .iter()
            .filter(|e| !is_marker(e))
            .filter_map(|e| e.uuid.as_deref())
            .collect();
        let leaves = leaf_events(&timeline.root);
        let mut found: Vec<&str> = leaves
            .iter()
            .filter(|e| !is_marker(e))
            .filter_map(|e| e.uuid.as_deref())
            .collect();
        let unique: HashSet<&str> = found.iter().copied().collect();
        prop_assert_eq!(unique.len(), found.len());
        found.sort_unstable();
        let mut expected = expected;
        expected.sort_unstable();
        prop_assert_eq!(found, expected);

        let input_tokens: u64 = events.iter().map(Event::total_tokens).sum();
        let tree_tokens: u64 = leaves.iter().map(|e| e.total_tokens()).sum();
        prop_assert_eq!(input_tokens, tree_tokens);
    }

    #[test]
    fn prop_marker_only_streams_still_build(ops in marker_ops()) {
        let events = stream(&ops);
        match build_timeline(&events) {
            Ok(timeline) => {
                prop_assert!(!timeline.root.content.is_empty());
                prop_assert_eq!(timeline.root.total_tokens, 0);

                let input: HashSet<&str> = events.iter().filter_map(|e| e.uuid.as_deref()).collect();
                let kept: Vec<&str> = leaf_events(&timeline.root)
                    .iter()
                    .filter_map(|e| e.uuid.as_deref())
                    .collect();
                let unique: HashSet<&str> = kept.iter().copied().collect();
                prop_assert_eq!(unique.len(), kept.len());
                prop_assert!(unique.is_subset(&input));
            }
            Err(TimelineError::EmptyTranscript) => {
                prop_assert!(events.iter().all(is_stray_end));
            }
            Err(other) => return Err(TestCaseError::fail(other.to_string())),
        }
    }

    #[test]
    fn prop_build_is_idempotent(ops in ops()) {
        let events = stream(&ops);
        let first = build_timeline(&events).ok();
        let second = build_timeline(&events).ok();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_rows_and_layout(ops in ops()) {
        let events = stream(&ops);
        let Ok(timeline) = build_timeline(&events) else {
            return Ok(());
        };
        let root = &timeline.root;
        let rows = compute_swimlane_rows(root);

        prop_assert!(rows[0].is_parent);
        let grouped: usize = rows.iter().skip(1).map(|row| row.span_count()).sum();
        let eligible = root.child_spans().filter(|span| !span.utility).count();
        prop_assert_eq!(grouped, eligible);

        let layouts = compute_row_layouts(&rows, root.start_time, root.end_time, MarkerDepth::Recursive);
        let mut placed: Vec<_> = layouts
            .iter()
            .flat_map(|layout| layout.spans.iter())
            .map(|span| {
                prop_assert!(span.left >= 0.0 && span.width >= 0.0);
                prop_assert!(span.left + span.width <= 100.0 + 1e-9);
                Ok((span.start_time, span.left))
            })
            .collect::<Result<_, TestCaseError>>()?;
        placed.sort_by_key(|(start, _)| *start);
        for pair in placed.windows(2) {
            prop_assert!(pair[0].1 <= pair[1].1);
        }
        for layout in &layouts {
            for pair in layout.markers.windows(2) {
                prop_assert!(pair[0].left <= pair[1].left);
            }
        }
    }
}

/// `[0,5], [4,9], [20,25]` seconds with 100 ms tolerance: two clusters
#[test]
fn test_overlap_clustering() {
    let mut events = Vec::new();
    for (id, start, stop) in [("a", 0, 5_000), ("b", 4_000, 9_000), ("c", 20_000, 25_000)] {
        events.push(begin(id, "explore", Some("agent"), start));
        events.push(model(&format!("{id}1"), start, stop - start, prompt("sys", id), 1));
        events.push(model(&format!("{id}2"), stop, 0, prompt("sys", "again"), 1));
        events.push(end(id, stop));
    }

    let timeline = build_timeline(&events).unwrap();
    let rows = compute_swimlane_rows_with(&timeline.root, 100);
    assert_eq!(rows.len(), 2);

    let clusters: Vec<Vec<&str>> = rows[1]
        .spans
        .iter()
        .map(|item| item.spans().into_iter().map(|span| span.id.as_str()).collect())
        .collect();
    assert_eq!(clusters, vec![vec!["a", "b"], vec!["c"]]);
    assert!(matches!(rows[1].spans[0], RowSpan::Parallel(_)));
    assert!(rows[1].spans.iter().all(|item| item.spans().iter().all(|s| s.span_type == Some(SpanType::Agent))));
}

/// Touching spans within the tolerance still count as parallel
#[test]
fn test_clustering_tolerance_boundary() {
    let mut events = Vec::new();
    for (id, start, stop) in [("a", 0, 1_000), ("b", 1_099, 2_000), ("c", 2_100, 3_000)] {
        events.push(begin(id, "explore", Some("agent"), start));
        events.push(model(&format!("{id}1"), start, stop - start, prompt("sys", id), 1));
        events.push(model(&format!("{id}2"), stop, 0, prompt("sys", "again"), 1));
        events.push(end(id, stop));
    }

    let timeline = build_timeline(&events).unwrap();
    let rows = compute_swimlane_rows(&timeline.root);
    let sizes: Vec<usize> = rows[1].spans.iter().map(RowSpan::len).collect();
    assert_eq!(sizes, vec![2, 1]);
}
