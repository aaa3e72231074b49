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


//! Timeline construction: phases, classification, rerolls and aggregates

mod common;

use common::*;
use tracelane_core::event::{ChatMessage, Event, EventKind, ScoreEvent};
use tracelane_core::layout::{compute_row_layouts, MarkerDepth, MarkerKind};
use tracelane_core::swimlane::compute_swimlane_rows;
use tracelane_core::timeline::{SpanType, TimelineNode, TimelineSpan};
use tracelane_core::{build_timeline, build_timeline_with, TimelineConfig, TimelineError};

fn trunk_models(span: &TimelineSpan) -> Vec<&str> {
    span.content
        .iter()
        .filter_map(TimelineNode::as_event)
        .filter(|event| event.as_model().is_some())
        .filter_map(|event| event.uuid.as_deref())
        .collect()
}

fn uuids(content: &[TimelineNode]) -> Vec<&str> {
    content
        .iter()
        .filter_map(TimelineNode::as_event)
        .filter_map(|event| event.uuid.as_deref())
        .collect()
}

/// Two same-named plain spans whose model calls share an input
#[test]
fn test_reroll_across_sibling_spans_becomes_one_branch() {
    let events = vec![
        begin("A", "explore", None, 0),
        model("m1", 0, 2_000, prompt("sys", "find the bug"), 40),
        end("A", 2_000),
        begin("B", "explore", None, 3_000),
        model("m2", 3_000, 2_000, prompt("sys", "find the bug"), 60),
        end("B", 5_000),
    ];

    let timeline = build_timeline(&events).unwrap();
    let root = &timeline.root;

    assert_eq!(root.span_type, Some(SpanType::Agent));
    assert_eq!(root.branches.len(), 1);

    let branch = &root.branches[0];
    assert!(uuids(&branch.content).contains(&"m1"));
    assert_eq!(trunk_models(root), vec!["m2"]);
    assert_eq!(root.total_tokens, 60);
    assert_eq!(branch.total_tokens, 40);

    // the earlier attempt is not a second swimlane row
    assert_eq!(compute_swimlane_rows(root).len(), 1);
}

#[test]
fn test_k_identical_calls_produce_k_minus_one_branches() {
    let events = vec![
        begin("s", "solver", Some("agent"), 0),
        model("m1", 0, 100, prompt("sys", "task"), 10),
        model("m2", 200, 100, prompt("sys", "task"), 10),
        model("m3", 400, 100, prompt("sys", "task"), 10),
        model("m4", 600, 100, prompt("sys", "other"), 10),
        end("s", 700),
    ];

    let timeline = build_timeline(&events).unwrap();
    let root = &timeline.root;

    assert_eq!(root.id, "s");
    assert_eq!(root.branches.len(), 2);
    assert_eq!(trunk_models(root), vec!["m3", "m4"]);
    assert_eq!(uuids(&root.branches[0].content), vec!["m1"]);
    assert_eq!(uuids(&root.branches[1].content), vec!["m2"]);
    assert!(root.branches.iter().all(|b| b.forked_at.is_empty()));
}

#[test]
fn test_compaction_separates_identical_calls() {
    let events = vec![
        begin("s", "solver", Some("agent"), 0),
        model("m1", 0, 100, prompt("sys", "task"), 10),
        compaction("c1", 150),
        model("m2", 200, 100, prompt("sys", "task"), 10),
        end("s", 300),
    ];

    let timeline = build_timeline(&events).unwrap();
    assert!(timeline.root.branches.is_empty());
    assert_eq!(trunk_models(&timeline.root), vec!["m1", "m2"]);
}

#[test]
fn test_detection_can_be_disabled() {
    let events = vec![
        model("m1", 0, 100, prompt("sys", "task"), 10),
        model("m2", 200, 100, prompt("sys", "task"), 10),
    ];
    let config = TimelineConfig {
        detect_branches: false,
        ..TimelineConfig::default()
    };

    let timeline = build_timeline_with(&events, &config).unwrap();
    assert!(timeline.root.branches.is_empty());
    assert_eq!(timeline.root.name, "main");
}

#[test]
fn test_fork_resolves_to_tool_call_and_marks_layout() {
    let first = model("m1", 0, 500, prompt("sys", "task"), 10);
    let reply = first
        .as_model()
        .and_then(|m| m.output_message())
        .cloned()
        .unwrap();
    let shared = vec![
        ChatMessage::system("sys"),
        ChatMessage::user("task"),
        reply,
        ChatMessage::tool("ls output", "call-1"),
    ];

    let events = vec![
        begin("s", "solver", Some("agent"), 0),
        first,
        tool("t1", "call-1", 600, 100),
        model("m2", 1_000, 500, shared.clone(), 20),
        model("m3", 2_000, 500, shared, 20),
        end("s", 2_500),
    ];

    let timeline = build_timeline(&events).unwrap();
    let root = &timeline.root;
    assert_eq!(root.branches.len(), 1);
    assert_eq!(root.branches[0].forked_at, "t1");

    let rows = compute_swimlane_rows(root);
    let layouts = compute_row_layouts(&rows, root.start_time, root.end_time, MarkerDepth::Direct);
    let branch_markers: Vec<_> = layouts[0]
        .markers
        .iter()
        .filter(|m| m.kind == MarkerKind::Branch)
        .collect();
    assert_eq!(branch_markers.len(), 1);
    assert_eq!(branch_markers[0].reference, "t1");
    assert_eq!(branch_markers[0].timestamp, at(600));
    assert_eq!(branch_markers[0].label, "1 branch");
}

#[test]
fn test_explicit_branch_spans_skip_detection() {
    let events = vec![
        begin("s", "solver", Some("agent"), 0),
        model("m1", 0, 100, prompt("sys", "task"), 10),
        begin("b1", "attempt", Some("branch"), 200),
        model("m2", 200, 100, prompt("sys", "task"), 10),
        end("b1", 300),
        model("m3", 400, 100, prompt("sys", "task"), 10),
        end("s", 500),
    ];

    let timeline = build_timeline(&events).unwrap();
    let root = &timeline.root;
    assert_eq!(root.branches.len(), 1);
    assert_eq!(root.branches[0].forked_at, "m1");
    assert_eq!(uuids(&root.branches[0].content), vec!["m2"]);
    assert_eq!(trunk_models(root), vec!["m1", "m3"]);
}

#[test]
fn test_phases_fold_into_solver_root() {
    let score = Event::new(
        at(3_100),
        ScoreEvent {
            score: serde_json::json!("C"),
            target: None,
            intermediate: false,
        },
    )
    .with_uuid("score");

    let events = vec![
        begin("i", "init", None, 0),
        tool("setup", "call-setup", 0, 100),
        end("i", 100),
        begin("sv", "solvers", None, 200),
        begin("r", "react", Some("agent"), 200),
        model("m1", 200, 1_000, prompt("sys", "task"), 100),
        tool("t1", "call-1", 1_300, 100),
        model("m2", 1_500, 1_000, prompt("sys", "continue"), 150),
        begin("h", "summarize", Some("agent"), 2_600),
        model("h1", 2_600, 200, prompt("you summarize", "text"), 30),
        end("h", 2_800),
        end("r", 2_900),
        end("sv", 2_900),
        begin("sc", "scorers", None, 3_000),
        score,
        end("sc", 3_200),
    ];

    let timeline = build_timeline(&events).unwrap();
    let root = &timeline.root;

    assert_eq!(timeline.name, "Default");
    assert_eq!(root.id, "r");
    assert_eq!(root.name, "react");

    let children: Vec<(&str, Option<SpanType>, bool)> = root
        .child_spans()
        .map(|span| (span.name.as_str(), span.span_type, span.utility))
        .collect();
    assert_eq!(
        children,
        vec![
            ("init", Some(SpanType::Init), false),
            ("summarize", Some(SpanType::Agent), true),
            ("scoring", Some(SpanType::Scorers), false),
        ]
    );
    assert_eq!(root.total_tokens, 280);
    assert_eq!(root.start_time, at(0));
    assert_eq!(root.end_time, at(3_100));

    // utility helpers get no row
    let rows = compute_swimlane_rows(root);
    let names: Vec<&str> = rows.iter().map(|row| row.name.as_str()).collect();
    assert_eq!(names, vec!["react", "init", "scoring"]);
}

#[test]
fn test_several_solver_agents_get_a_wrapper_root() {
    let events = vec![
        begin("sv", "solvers", None, 0),
        begin("a", "explore", Some("agent"), 0),
        model("a1", 0, 100, prompt("sys", "left"), 5),
        model("a2", 200, 100, prompt("sys", "left"), 5),
        end("a", 300),
        begin("b", "explore", Some("agent"), 50),
        model("b1", 50, 100, prompt("sys", "right"), 5),
        end("b", 150),
        end("sv", 300),
    ];

    let timeline = build_timeline(&events).unwrap();
    let root = &timeline.root;
    assert_eq!(root.name, "main");
    assert!(root.branches.is_empty());

    let explore: Vec<&TimelineSpan> = root.child_spans().collect();
    assert_eq!(explore.len(), 2);
    assert_eq!(explore[0].branches.len(), 1);
    assert!(explore[1].branches.is_empty());
}

#[test]
fn test_tool_span_with_model_calls_is_an_agent() {
    let events = vec![
        model("m0", 0, 100, prompt("sys", "task"), 1),
        begin("t", "research", Some("tool"), 200),
        model("m1", 200, 100, prompt("sys", "dig"), 1),
        model("m2", 400, 100, prompt("sys", "dig deeper"), 1),
        end("t", 500),
        begin("plain", "bash", Some("tool"), 600),
        tool("t1", "call-1", 600, 50),
        end("plain", 650),
    ];

    let timeline = build_timeline(&events).unwrap();
    let root = &timeline.root;
    let spans: Vec<&str> = root.child_spans().map(|span| span.name.as_str()).collect();
    assert_eq!(spans, vec!["research"]);

    // the plain tool span is unrolled, markers included
    let kinds: Vec<&str> = root
        .content
        .iter()
        .filter_map(TimelineNode::as_event)
        .map(Event::kind_name)
        .collect();
    assert_eq!(kinds, vec!["model", "span_begin", "tool", "span_end"]);
}

#[test]
fn test_unmatched_span_end_is_dropped() {
    let events = vec![
        model("m1", 0, 100, prompt("sys", "task"), 10),
        end("ghost", 150),
        model("m2", 200, 100, prompt("sys", "next"), 10),
    ];

    let timeline = build_timeline(&events).unwrap();
    let leaves = leaf_events(&timeline.root);
    assert_eq!(leaves.len(), 2);
    assert!(leaves.iter().all(|e| !matches!(e.kind, EventKind::SpanEnd(_))));
}

#[test]
fn test_idle_gap_between_phases() {
    let events = vec![
        begin("a", "explore", Some("agent"), 0),
        model("m1", 0, 1_000, prompt("sys", "one"), 1),
        end("a", 1_000),
        begin("b", "plan", Some("agent"), 11_000),
        model("m2", 11_000, 1_000, prompt("sys", "two"), 1),
        end("b", 12_000),
    ];

    let timeline = build_timeline(&events).unwrap();
    let root = &timeline.root;
    assert_eq!(root.name, "main");
    assert!((root.idle_time - 10.0).abs() < 1e-9);
    for child in root.child_spans() {
        assert_eq!(child.idle_time, 0.0);
    }
}

#[test]
fn test_only_an_empty_stream_is_rejected() {
    assert!(matches!(build_timeline(&[]), Err(TimelineError::EmptyTranscript)));
    assert!(matches!(
        build_timeline(&[end("ghost", 0)]),
        Err(TimelineError::EmptyTranscript)
    ));
}

#[test]
fn test_agent_with_no_events_unrolls_into_root() {
    let events = vec![begin("a", "explore", Some("agent"), 0), end("a", 10)];
    let timeline = build_timeline(&events).unwrap();

    assert_eq!(timeline.root.name, "main");
    assert!(timeline.root.child_spans().next().is_none());
    assert_eq!(uuids(&timeline.root.content), vec!["begin-a", "end-a"]);
    assert_eq!(timeline.root.total_tokens, 0);
}

#[test]
fn test_agent_holding_only_a_branch_keeps_branch_events() {
    let events = vec![
        model("m0", 0, 100, prompt("sys", "start"), 5),
        begin("s", "explore", Some("agent"), 200),
        begin("b1", "attempt", Some("branch"), 200),
        model("m1", 200, 100, prompt("sys", "retry"), 7),
        end("b1", 300),
        end("s", 300),
    ];
    let timeline = build_timeline(&events).unwrap();
    let root = &timeline.root;

    let leaves: Vec<&str> = leaf_events(root).iter().filter_map(|e| e.uuid.as_deref()).collect();
    assert!(leaves.contains(&"m0"));
    assert!(leaves.contains(&"m1"));
    assert_eq!(root.branches.len(), 1);
    assert_eq!(root.branches[0].forked_at, "m0");
    assert_eq!(trunk_models(root), vec!["m0"]);
    assert_eq!(root.total_tokens + root.branches[0].total_tokens, 12);
}

#[test]
fn test_branch_only_stream_unrolls_into_root() {
    let events = vec![
        begin("s", "explore", Some("agent"), 0),
        begin("b1", "attempt", Some("branch"), 0),
        model("m1", 0, 100, prompt("sys", "retry"), 7),
        end("b1", 100),
        end("s", 100),
    ];
    let timeline = build_timeline(&events).unwrap();

    assert!(timeline.root.branches.is_empty());
    assert_eq!(
        uuids(&timeline.root.content),
        vec!["begin-s", "begin-b1", "m1", "end-b1", "end-s"]
    );
    assert_eq!(timeline.root.total_tokens, 7);
}

#[test]
fn test_rebuild_is_idempotent() {
    let events = vec![
        begin("A", "explore", None, 0),
        model("m1", 0, 2_000, prompt("sys", "find the bug"), 40),
        end("A", 2_000),
        begin("B", "explore", Some("agent"), 3_000),
        model("m2", 3_000, 2_000, prompt("sys", "find the bug"), 60),
        failing_tool("t1", 5_100),
        end("B", 5_200),
    ];

    assert_eq!(build_timeline(&events).unwrap(), build_timeline(&events).unwrap());
}
