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

//! Timeline error types

use thiserror::Error;

/// Result type for timeline operations
pub type Result<T> = std::result::Result<T, TimelineError>;

/// Errors that can occur while loading events or building a timeline
///
/// Malformed span nesting and unresolvable navigation paths are recovered
/// silently and never show up here. The `Empty*` variants are contract
/// violations: callers of the span/branch factories must guard against
/// empty content upstream.
#[derive(Debug, Error)]
pub enum TimelineError {
    #[error("span '{id}' constructed with no content")]
    EmptySpan { id: String },

    #[error("branch forked at '{forked_at}' constructed with no content")]
    EmptyBranch { forked_at: String },

    #[error("transcript contains no events to build a timeline from")]
    EmptyTranscript,

    #[error("failed to parse event on line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid navigation query: {0}")]
    Query(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
