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

//! Agent classification and timeline assembly
//!
//! Walks the span tree and decides what each span becomes:
//!
//! - **agent** spans (declared `agent`/`solver`, or `tool` spans that contain
//!   model calls) become nested [`TimelineSpan`]s
//! - **branch** spans become [`Branch`]es of the enclosing agent
//! - everything else is unrolled in place: its begin/end events and children
//!   join the parent's content in order
//!
//! Top-level `init`, `solvers` and `scorers` phases are folded into the root:
//! `init` and `scorers` become leading/trailing pseudo-spans, and `solvers`
//! is searched for the agent that becomes the root.

use tracing::debug;

use crate::branch::{detect_branches, detect_in_descendants, FingerprintCache};
use crate::config::TimelineConfig;
use crate::error::{Result, TimelineError};
use crate::event::{Event, EventKind};
use crate::span_tree::{SpanTree, TreeRef};
use crate::timeline::{Branch, SpanType, Timeline, TimelineNode, TimelineSpan};

const ROOT_SPAN_ID: &str = "main";
const ROOT_SPAN_NAME: &str = "main";
const SCORING_SPAN_NAME: &str = "scoring";

/// Build a timeline with the default configuration
pub fn build_timeline(events: &[Event]) -> Result<Timeline> {
    build_timeline_with(events, &TimelineConfig::default())
}

/// Build a timeline from the full event list
///
/// Stateless and deterministic: the same events always produce an equal tree.
/// Fails only when no event survives span-tree assembly: an empty stream, or
/// one made only of unmatched `span_end`s.
pub fn build_timeline_with(events: &[Event], config: &TimelineConfig) -> Result<Timeline> {
    let tree = SpanTree::build(events);
    let classifier = Classifier { tree: &tree };
    let RootAssembly { mut root, wrapper } = classifier.assemble_root()?;

    if config.classify_utility {
        classify_utility(&mut root, None);
    }

    if config.detect_branches {
        let mut cache = FingerprintCache::default();
        if wrapper {
            detect_in_descendants(&mut root, &mut cache)?;
        } else {
            detect_branches(&mut root, &mut cache)?;
        }
    }

    debug!(
        spans = tree.span_count(),
        events = events.len(),
        root = %root.name,
        "built timeline"
    );

    Ok(Timeline {
        name: "Default".to_string(),
        description: String::new(),
        root,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Init,
    Solvers,
    Scorers,
}

struct RootAssembly {
    root: TimelineSpan,
    /// Root is a synthetic wrapper around several agents
    wrapper: bool,
}

/// Identity of the solver agent promoted to root
struct RootIdentity {
    id: String,
    name: String,
    span_type: Option<SpanType>,
    description: Option<String>,
}

struct Classifier<'t, 'a> {
    tree: &'t SpanTree<'a>,
}

impl<'t, 'a> Classifier<'t, 'a> {
    fn is_agent(&self, slot: usize) -> bool {
        let record = self.tree.span(slot);
        match SpanType::from_declared(record.declared_type) {
            Some(SpanType::Agent) => true,
            Some(SpanType::Tool) => self.tree.contains_model_events(slot),
            _ => false,
        }
    }

    fn is_branch(&self, slot: usize) -> bool {
        SpanType::from_declared(self.tree.span(slot).declared_type) == Some(SpanType::Branch)
    }

    fn phase(&self, item: TreeRef) -> Option<Phase> {
        let TreeRef::Span(slot) = item else {
            return None;
        };
        match self.tree.span(slot).name.to_ascii_lowercase().as_str() {
            "init" => Some(Phase::Init),
            "solvers" => Some(Phase::Solvers),
            "scorers" => Some(Phase::Scorers),
            _ => None,
        }
    }

    /// Append the timeline content for `item` to `out`
    fn unroll(
        &self,
        item: TreeRef,
        out: &mut Vec<TimelineNode>,
        branches: &mut Vec<Branch>,
    ) -> Result<()> {
        let slot = match item {
            TreeRef::Event(index) => {
                out.push(self.tree.event(index).clone().into());
                return Ok(());
            }
            TreeRef::Span(slot) => slot,
        };

        if self.is_agent(slot) {
            let mut orphans = Vec::new();
            match self.agent_span(slot, &mut orphans)? {
                Some(span) => out.push(TimelineNode::Span(span)),
                None => adopt(out, orphans, branches),
            }
            return Ok(());
        }

        if self.is_branch(slot) {
            let mut content = Vec::new();
            let mut nested = Vec::new();
            for &child in &self.tree.span(slot).children {
                self.unroll(child, &mut content, &mut nested)?;
            }
            if content.is_empty() {
                debug!(span_id = %self.tree.span(slot).id, "eliding empty branch span");
            } else {
                branches.push(Branch::new(preceding_uuid(out), content)?);
            }
            // branches nested in a branch stay attached to the enclosing agent
            branches.extend(nested);
            return Ok(());
        }

        let record = self.tree.span(slot);
        out.push(record.begin.clone().into());
        for &child in &record.children {
            self.unroll(child, out, branches)?;
        }
        if let Some(end) = record.end {
            out.push(end.clone().into());
        }
        Ok(())
    }

    /// Build an agent span; `None` when it has no trunk content, in which
    /// case its branches are moved to `orphans`
    fn agent_span(&self, slot: usize, orphans: &mut Vec<Branch>) -> Result<Option<TimelineSpan>> {
        let record = self.tree.span(slot);
        let mut content = Vec::new();
        let mut branches = Vec::new();
        for &child in &record.children {
            self.unroll(child, &mut content, &mut branches)?;
        }

        if content.is_empty() {
            debug!(span_id = %record.id, branches = branches.len(), "eliding empty agent span");
            orphans.append(&mut branches);
            return Ok(None);
        }

        let description = match &record.begin.kind {
            EventKind::SpanBegin(begin) => begin.description(),
            _ => None,
        };

        let span = TimelineSpan::new(
            record.id,
            record.name,
            SpanType::from_declared(record.declared_type),
            content,
        )?
        .with_branches(branches)
        .with_description(description);
        Ok(Some(span))
    }

    /// Content of a phase span wrapped as a pseudo-span; branches of an
    /// empty phase are moved to `orphans`
    fn phase_span(
        &self,
        slot: usize,
        name: &str,
        span_type: SpanType,
        orphans: &mut Vec<Branch>,
    ) -> Result<Option<TimelineSpan>> {
        let record = self.tree.span(slot);
        let mut content = Vec::new();
        let mut branches = Vec::new();
        for &child in &record.children {
            self.unroll(child, &mut content, &mut branches)?;
        }
        if content.is_empty() {
            orphans.append(&mut branches);
            return Ok(None);
        }
        Ok(Some(
            TimelineSpan::new(record.id, name, Some(span_type), content)?.with_branches(branches),
        ))
    }

    /// Outermost agent spans below `slot`, looking through non-agent wrappers
    fn find_agents(&self, slot: usize, found: &mut Vec<usize>) {
        for &child in &self.tree.span(slot).children {
            if let TreeRef::Span(child) = child {
                if self.is_agent(child) {
                    found.push(child);
                } else {
                    self.find_agents(child, found);
                }
            }
        }
    }

    fn assemble_root(&self) -> Result<RootAssembly> {
        let roots = self.tree.roots();
        if !roots.iter().any(|&item| self.phase(item).is_some()) {
            return self.assemble_flat_root(roots);
        }

        let mut content = Vec::new();
        let mut branches = Vec::new();
        let mut root_agent: Option<RootIdentity> = None;
        let mut wrapper = false;

        for &item in roots {
            let TreeRef::Span(slot) = item else {
                self.unroll(item, &mut content, &mut branches)?;
                continue;
            };

            match self.phase(item) {
                Some(phase @ (Phase::Init | Phase::Scorers)) => {
                    let (name, span_type) = match phase {
                        Phase::Init => ("init", SpanType::Init),
                        _ => (SCORING_SPAN_NAME, SpanType::Scorers),
                    };
                    let mut orphans = Vec::new();
                    match self.phase_span(slot, name, span_type, &mut orphans)? {
                        Some(span) => content.push(TimelineNode::Span(span)),
                        None => adopt(&content, orphans, &mut branches),
                    }
                }
                Some(Phase::Solvers) => {
                    let mut agents = Vec::new();
                    self.find_agents(slot, &mut agents);

                    let mut solver_content = Vec::new();
                    for &child in &self.tree.span(slot).children {
                        self.unroll(child, &mut solver_content, &mut branches)?;
                    }

                    if agents.len() == 1 && root_agent.is_none() {
                        let agent_id = self.tree.span(agents[0]).id;
                        let position = solver_content.iter().position(
                            |node| matches!(node, TimelineNode::Span(span) if span.id == agent_id),
                        );
                        if let Some(position) = position {
                            if let TimelineNode::Span(agent) = solver_content.remove(position) {
                                // sibling non-agent content goes ahead of the agent's own
                                content.append(&mut solver_content);
                                let TimelineSpan {
                                    id,
                                    name,
                                    span_type,
                                    description,
                                    content: agent_content,
                                    branches: agent_branches,
                                    ..
                                } = agent;
                                content.extend(agent_content);
                                branches.extend(agent_branches);
                                root_agent = Some(RootIdentity {
                                    id,
                                    name,
                                    span_type,
                                    description,
                                });
                            }
                            continue;
                        }
                    } else if agents.len() > 1 {
                        wrapper = true;
                    }
                    content.append(&mut solver_content);
                }
                None => self.unroll(item, &mut content, &mut branches)?,
            }
        }

        if content.is_empty() {
            return self.assemble_unrolled_root();
        }

        let root = match root_agent {
            Some(agent) => TimelineSpan::new(agent.id, &agent.name, agent.span_type, content)?
                .with_description(agent.description),
            None => TimelineSpan::new(ROOT_SPAN_ID, ROOT_SPAN_NAME, Some(SpanType::Agent), content)?,
        };

        Ok(RootAssembly {
            root: root.with_branches(branches),
            wrapper,
        })
    }

    /// Stream without phase spans: the whole transcript is one conversation
    fn assemble_flat_root(&self, roots: &[TreeRef]) -> Result<RootAssembly> {
        let mut content = Vec::new();
        let mut branches = Vec::new();
        for &item in roots {
            self.unroll(item, &mut content, &mut branches)?;
        }

        if content.is_empty() {
            return self.assemble_unrolled_root();
        }

        // a single agent span covering the whole stream is the root itself
        if branches.is_empty() && content.len() == 1 {
            if let Some(TimelineNode::Span(_)) = content.first() {
                if let Some(TimelineNode::Span(span)) = content.pop() {
                    return Ok(RootAssembly {
                        root: span,
                        wrapper: false,
                    });
                }
            }
        }

        let root = TimelineSpan::new(ROOT_SPAN_ID, ROOT_SPAN_NAME, Some(SpanType::Agent), content)?
            .with_branches(branches);
        Ok(RootAssembly {
            root,
            wrapper: false,
        })
    }

    /// Root for a stream with no trunk content: every surviving event,
    /// span markers included, in stream order
    fn assemble_unrolled_root(&self) -> Result<RootAssembly> {
        let mut content = Vec::new();
        for &item in self.tree.roots() {
            self.flatten(item, &mut content);
        }
        if content.is_empty() {
            return Err(TimelineError::EmptyTranscript);
        }

        debug!(events = content.len(), "no agent content, unrolling every span into the root");
        let root = TimelineSpan::new(ROOT_SPAN_ID, ROOT_SPAN_NAME, Some(SpanType::Agent), content)?;
        Ok(RootAssembly {
            root,
            wrapper: false,
        })
    }

    fn flatten(&self, item: TreeRef, out: &mut Vec<TimelineNode>) {
        let slot = match item {
            TreeRef::Event(index) => {
                out.push(self.tree.event(index).clone().into());
                return;
            }
            TreeRef::Span(slot) => slot,
        };
        let record = self.tree.span(slot);
        out.push(record.begin.clone().into());
        for &child in &record.children {
            self.flatten(child, out);
        }
        if let Some(end) = record.end {
            out.push(end.clone().into());
        }
    }
}

/// Attach the branches of an elided span to the enclosing trunk; forks that
/// could not be resolved inside the span anchor at the trunk's last event
fn adopt(trunk: &[TimelineNode], orphans: Vec<Branch>, branches: &mut Vec<Branch>) {
    if orphans.is_empty() {
        return;
    }
    let fork = preceding_uuid(trunk);
    branches.extend(orphans.into_iter().map(|mut branch| {
        if branch.forked_at.is_empty() {
            branch.forked_at = fork.clone();
        }
        branch
    }));
}

/// Uuid of the last event already in `content`, "" when there is none
fn preceding_uuid(content: &[TimelineNode]) -> String {
    content
        .iter()
        .rev()
        .find_map(|node| node.as_event().and_then(|event| event.uuid.clone()))
        .unwrap_or_default()
}

/// System prompt of the first model call directly in `content`
fn own_system_prompt(content: &[TimelineNode]) -> Option<String> {
    content
        .iter()
        .find_map(|node| node.as_event().and_then(Event::as_model))
        .and_then(|model| model.system_prompt())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Turn {
    Model,
    Tool,
}

/// Exactly one model call, or one model → tool(s) → model round trip
fn is_single_turn(span: &TimelineSpan) -> bool {
    if span.child_spans().next().is_some() {
        return false;
    }

    let turns: Vec<Turn> = span
        .content
        .iter()
        .filter_map(TimelineNode::as_event)
        .filter_map(|event| {
            if event.as_model().is_some() {
                Some(Turn::Model)
            } else if event.as_tool().is_some() {
                Some(Turn::Tool)
            } else {
                None
            }
        })
        .collect();

    let first = turns.iter().position(|turn| *turn == Turn::Model);
    let last = turns.iter().rposition(|turn| *turn == Turn::Model);
    let (Some(first), Some(last)) = (first, last) else {
        return false;
    };

    match &turns[first..=last] {
        [Turn::Model] => true,
        [Turn::Model, tools @ .., Turn::Model] => {
            !tools.is_empty() && tools.iter().all(|turn| *turn == Turn::Tool)
        }
        _ => false,
    }
}

/// Mark nested single-turn agents whose system prompt differs from the
/// prompt they inherit
pub(crate) fn classify_utility(span: &mut TimelineSpan, inherited: Option<&str>) {
    let effective = own_system_prompt(&span.content).or_else(|| inherited.map(str::to_string));

    let children = span
        .content
        .iter_mut()
        .chain(span.branches.iter_mut().flat_map(|branch| branch.content.iter_mut()));

    for node in children {
        let TimelineNode::Span(child) = node else {
            continue;
        };
        let prompt = own_system_prompt(&child.content);
        child.utility = match prompt.as_deref() {
            Some(prompt) => Some(prompt) != effective.as_deref() && is_single_turn(child),
            None => false,
        };
        classify_utility(child, effective.as_deref());
    }
}
