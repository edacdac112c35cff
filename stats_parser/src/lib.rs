// Copyright © 2024 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

//! Recovers counters from captured console transcripts of the packet
//! forwarder (testpmd) and the traffic generator (TRex).

mod forwarder;
mod json;
mod trafficgen;

use std::num::ParseIntError;

use thiserror::Error;

pub use crate::forwarder::{
    extract_section, parse_forwarder_stats, parse_section, ForwarderStats, PortStats, StatsIndex,
};
pub use crate::json::{extract_json, strip_control_sequences, SERVER_RESPONSE_MARKER};
pub use crate::trafficgen::{
    parse_global_stats, parse_port_stats, GeneratorPortStats, GlobalStats, GlobalStatsResult,
    PortStatsResult, RpcReply, GLOBAL_STATS_METHOD, PORT_STATS_METHOD,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Start marker {0:?} not found")]
    SectionStartNotFound(String),

    #[error("End marker {end:?} not found after start marker {start:?}")]
    SectionEndNotFound { start: String, end: String },

    /// The section holds a line that is neither blank nor a counter line.
    #[error("Unexpected line in statistics section: {0:?}")]
    UnexpectedLine(String),

    #[error("Missing counter at field {field} of {line:?}")]
    MissingField { line: String, field: usize },

    #[error("Invalid counter {value:?} in {line:?}")]
    ParseCounter {
        line: String,
        value: String,
        #[source]
        source: ParseIntError,
    },

    #[error("Error parsing forwarding statistics of {0}")]
    Section(StatsIndex, #[source] Box<Error>),

    #[error("Request {0:?} not found")]
    RequestNotFound(String),

    #[error("Marker \"Server Response:\" not found after request {0:?}")]
    ResponseMarkerNotFound(String),

    #[error("Response body start not found after request {0:?}")]
    ResponseStartNotFound(String),

    #[error("Response body end not found after request {0:?}")]
    ResponseEndNotFound(String),

    #[error("Error decoding {method} reply")]
    Decode {
        method: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
