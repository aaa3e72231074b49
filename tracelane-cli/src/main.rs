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


//! Tracelane CLI
//!
//! Builds a timeline from an event file and prints its projections.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracelane_core::layout::{compute_row_layouts_scaled, MarkerDepth, RowLayout};
use tracelane_core::navigation::{build_breadcrumbs, resolve_path, ResolvedNode};
use tracelane_core::event::Event;
use tracelane_core::raw_events::{collect_raw_events_with, collect_span_events_with, RawEventOptions};
use tracelane_core::summary::{format_duration, format_tokens, TimelineSummary};
use tracelane_core::swimlane::SwimlaneRow;
use tracelane_core::time_mapping::{LinearScale, TimeMapping, TimeScale};
use tracelane_core::timeline::{millis_between, Timeline, TimelineSpan};
use tracelane_core::{build_timeline_with, load_events, TimelineConfig};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tracelane")]
#[command(about = "Tracelane - timelines for agent evaluation transcripts", long_about = None)]
struct Cli {
    /// Timeline config file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose mode
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON (machine-readable)
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Input {
    /// Event file (JSON array or JSON Lines)
    events: PathBuf,
}

#[derive(Args)]
struct Location {
    /// Drill-down path, e.g. `plan/explore-2/@branch-1`
    #[arg(short, long, default_value = "")]
    path: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the span hierarchy
    Tree {
        #[command(flatten)]
        input: Input,
    },

    /// Print swimlane rows of a node
    Rows {
        #[command(flatten)]
        input: Input,

        #[command(flatten)]
        location: Location,
    },

    /// Print positioned bars and markers of a node
    Layout {
        #[command(flatten)]
        input: Input,

        #[command(flatten)]
        location: Location,

        /// Marker depth: direct, children or recursive
        #[arg(long)]
        depth: Option<MarkerDepth>,

        /// Compress long idle gaps
        #[arg(long)]
        compress: bool,
    },

    /// Print breadcrumbs for a path
    Crumbs {
        #[command(flatten)]
        input: Input,

        /// Drill-down path
        #[arg(short, long)]
        path: String,
    },

    /// Print run statistics
    Summary {
        #[command(flatten)]
        input: Input,
    },

    /// Export a node as JSON
    Export {
        #[command(flatten)]
        input: Input,

        #[command(flatten)]
        location: Location,

        /// Export the flat event list instead of the tree
        #[arg(long)]
        raw: bool,

        /// With --raw, re-emit branches as branch spans after their fork
        #[arg(long, requires = "raw")]
        branches: bool,
    },
}

/// Row summary for JSON output
#[derive(Serialize)]
struct RowView {
    name: String,
    is_parent: bool,
    spans: usize,
    parallel_groups: usize,
    total_tokens: u64,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
}

impl From<&SwimlaneRow<'_>> for RowView {
    fn from(row: &SwimlaneRow<'_>) -> Self {
        Self {
            name: row.name.clone(),
            is_parent: row.is_parent,
            spans: row.span_count(),
            parallel_groups: row.spans.iter().filter(|item| item.is_parallel()).count(),
            total_tokens: row.total_tokens,
            start_time: row.start_time,
            end_time: row.end_time,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Tree { input } => {
            let timeline = load_timeline(&input.events, &config)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&timeline)?);
            } else {
                println!("{}", timeline.name);
                print_span(&timeline.root, 1);
            }
        }

        Commands::Rows { input, location } => {
            let timeline = load_timeline(&input.events, &config)?;
            let node = resolve_or_root(&timeline, &location.path);
            let rows = node.swimlane_rows(config.overlap_tolerance_ms);
            if cli.json {
                let views: Vec<RowView> = rows.iter().map(RowView::from).collect();
                println!("{}", serde_json::to_string_pretty(&views)?);
            } else {
                let origin = node.start_time();
                for row in &rows {
                    let parallel = row.spans.iter().filter(|item| item.is_parallel()).count();
                    println!(
                        "{:<20} {:>3} spans {:>3} parallel {:>8} tokens  {:>8.1}s .. {:>8.1}s",
                        row.display_name(),
                        row.span_count(),
                        parallel,
                        format_tokens(row.total_tokens),
                        millis_between(origin, row.start_time) / 1000.0,
                        millis_between(origin, row.end_time) / 1000.0,
                    );
                }
            }
        }

        Commands::Layout {
            input,
            location,
            depth,
            compress,
        } => {
            let timeline = load_timeline(&input.events, &config)?;
            let node = resolve_or_root(&timeline, &location.path);
            let rows = node.swimlane_rows(config.overlap_tolerance_ms);
            let depth = depth.unwrap_or(config.marker_depth);

            let mapping = match node {
                _ if !compress => None,
                ResolvedNode::Span(span) => Some(TimeMapping::for_span(
                    span,
                    config.idle_gap_threshold_ms,
                    config.compressed_gap_ms,
                )),
                ResolvedNode::Branch { branch, .. } => Some(TimeMapping::for_branch(
                    branch,
                    config.idle_gap_threshold_ms,
                    config.compressed_gap_ms,
                )),
                ResolvedNode::Group { .. } => {
                    warn!("gap compression is not available for a group, using a linear scale");
                    None
                }
            };
            let scale: Box<dyn TimeScale> = match mapping {
                Some(mapping) => {
                    debug!(gaps = mapping.compressed_gaps(), "compressed idle gaps");
                    Box::new(mapping)
                }
                None => Box::new(LinearScale::new(node.start_time(), node.end_time())),
            };

            let layouts = compute_row_layouts_scaled(&rows, scale.as_ref(), depth);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&layouts)?);
            } else {
                print_layouts(&layouts);
            }
        }

        Commands::Crumbs { input, path } => {
            let timeline = load_timeline(&input.events, &config)?;
            let crumbs = build_breadcrumbs(&timeline, &path);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&crumbs)?);
            } else {
                let labels: Vec<String> = crumbs
                    .iter()
                    .map(|crumb| {
                        if crumb.resolved {
                            crumb.label.clone()
                        } else {
                            format!("{}?", crumb.label)
                        }
                    })
                    .collect();
                println!("{}", labels.join(" > "));
            }
        }

        Commands::Summary { input } => {
            let timeline = load_timeline(&input.events, &config)?;
            let summary = TimelineSummary::from_timeline(&timeline);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("Timeline:     {}", summary.name);
                println!("Agents:       {} (+{} utility)", summary.agent_spans, summary.utility_spans);
                println!("Branches:     {}", summary.branches);
                println!("Model calls:  {}", summary.model_calls);
                println!("Tool calls:   {}", summary.tool_calls);
                println!("Errors:       {}", summary.errors);
                println!("Compactions:  {}", summary.compactions);
                println!("Tokens:       {}", format_tokens(summary.total_tokens));
                println!(
                    "Duration:     {} ({} idle)",
                    format_duration(summary.duration_secs),
                    format_duration(summary.idle_secs)
                );
            }
        }

        Commands::Export {
            input,
            location,
            raw,
            branches,
        } => {
            let timeline = load_timeline(&input.events, &config)?;
            let node = resolve_or_root(&timeline, &location.path);
            let options = RawEventOptions {
                include_branches: branches,
            };
            let output = match (node, raw) {
                (ResolvedNode::Branch { branch, .. }, true) => {
                    serde_json::to_string_pretty(&collect_raw_events_with(&branch.content, options))?
                }
                (ResolvedNode::Branch { branch, .. }, false) => serde_json::to_string_pretty(branch)?,
                (ResolvedNode::Span(span), false) => serde_json::to_string_pretty(span)?,
                (node, true) => {
                    let events: Vec<Event> = node
                        .members()
                        .into_iter()
                        .flat_map(|span| collect_span_events_with(span, options))
                        .collect();
                    serde_json::to_string_pretty(&events)?
                }
                (node, false) => serde_json::to_string_pretty(&node.members())?,
            };
            println!("{output}");
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<TimelineConfig> {
    let config = match path {
        Some(path) => TimelineConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => TimelineConfig::default(),
    }
    .apply_env();
    config.validate().context("Invalid timeline config")?;
    debug!(?config, "timeline config");
    Ok(config)
}

fn load_timeline(path: &Path, config: &TimelineConfig) -> Result<Timeline> {
    let events = load_events(path)
        .with_context(|| format!("Failed to read events from {}", path.display()))?;
    info!(events = events.len(), path = %path.display(), "loaded events");
    build_timeline_with(&events, config).context("Failed to build timeline")
}

fn resolve_or_root<'a>(timeline: &'a Timeline, path: &str) -> ResolvedNode<'a> {
    resolve_path(timeline, path).unwrap_or_else(|| {
        warn!(path, "path does not resolve, using the root");
        ResolvedNode::Span(&timeline.root)
    })
}

fn print_span(span: &TimelineSpan, depth: usize) {
    let indent = "  ".repeat(depth);
    let kind = span.span_type.map_or("span", |kind| kind.as_str());
    let utility = if span.utility { ", utility" } else { "" };
    println!(
        "{indent}{} [{kind}{utility}] {} tokens, {}, idle {}",
        span.display_name(),
        format_tokens(span.total_tokens),
        format_duration(span.duration_ms() / 1000.0),
        format_duration(span.idle_time),
    );
    for child in span.child_spans() {
        print_span(child, depth + 1);
    }
    for (index, branch) in span.branches.iter().enumerate() {
        let fork = if branch.forked_at.is_empty() {
            "?"
        } else {
            branch.forked_at.as_str()
        };
        println!(
            "{indent}  @branch-{} (forked at {fork}) {} tokens",
            index + 1,
            format_tokens(branch.total_tokens),
        );
        for child in branch.child_spans() {
            print_span(child, depth + 2);
        }
    }
}

fn print_layouts(layouts: &[RowLayout]) {
    for layout in layouts {
        println!("{}", layout.name);
        for span in &layout.spans {
            let mut flags = Vec::new();
            if span.parallel {
                flags.push(format!("x{}", span.span_ids.len()));
            }
            if span.drillable {
                flags.push("drill".to_string());
            }
            if let Some(index) = span.drill_index {
                flags.push(format!("#{index}"));
            }
            println!(
                "  {:>6.2}% +{:>6.2}%  {}",
                span.left,
                span.width,
                flags.join(" ")
            );
        }
        for marker in &layout.markers {
            println!("  ^ {:>6.2}% {:?}: {}", marker.left, marker.kind, marker.label);
        }
    }
}
