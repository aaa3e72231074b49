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


//! Tracelane Core
//!
//! Rebuilds a navigable timeline from a flat agent evaluation transcript:
//! nested agent spans, detected rerolls, idle accounting, swimlane rows and
//! drill-down navigation.

pub mod branch;
pub mod classify;
pub mod config;
pub mod error;
pub mod event;
pub mod layout;
pub mod navigation;
pub mod raw_events;
pub mod span_tree;
pub mod summary;
pub mod swimlane;
pub mod time_mapping;
pub mod timeline;

pub use branch::{detect_branches, FingerprintCache};
pub use classify::{build_timeline, build_timeline_with};
pub use config::TimelineConfig;
pub use error::{Result, TimelineError};
pub use event::{load_events, parse_events, Event, EventKind};
pub use layout::{
    compute_row_layouts, compute_row_layouts_scaled, MarkerDepth, MarkerKind, PositionedMarker,
    PositionedSpan, RowLayout,
};
pub use navigation::{
    build_breadcrumbs, resolve_path, Breadcrumb, MemoryStore, NavigationStore, Navigator,
    QueryState, ResolvedNode,
};
pub use raw_events::{
    collect_raw_events, collect_raw_events_with, collect_span_events, collect_span_events_with,
    RawEventOptions,
};
pub use summary::{format_duration, format_tokens, TimelineSummary};
pub use swimlane::{
    compute_branch_rows, compute_group_rows, compute_swimlane_rows, compute_swimlane_rows_with, RowSpan,
    SwimlaneRow,
};
pub use time_mapping::{LinearScale, TimeMapping, TimeScale};
pub use timeline::{Branch, SpanType, Timeline, TimelineEvent, TimelineNode, TimelineSpan};
