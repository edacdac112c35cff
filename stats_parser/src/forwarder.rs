// Copyright © 2024 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use std::fmt;
use std::ops::Index;

use serde::Serialize;

use crate::{Error, Result};

const PORT_0_START: &str = "Forward statistics for port 0";
const PORT_1_START: &str = "Forward statistics for port 1";
const SUMMARY_START: &str = "Accumulated forward statistics for all ports";
const PORT_END: &str = "--------------------";
const SUMMARY_END: &str = "++++++++++++++++";

const RX_LINE: &str = "RX-packets";
const TX_LINE: &str = "TX-packets";
// e.g. "RX-packets: 480000001  RX-dropped: 2  RX-total: 480000003"
const COUNTER_FIELDS: [usize; 3] = [1, 3, 5];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatsIndex {
    Port0,
    Port1,
    Summary,
}

impl StatsIndex {
    pub const ALL: [StatsIndex; 3] = [StatsIndex::Port0, StatsIndex::Port1, StatsIndex::Summary];

    fn markers(self) -> (&'static str, &'static str) {
        match self {
            StatsIndex::Port0 => (PORT_0_START, PORT_END),
            StatsIndex::Port1 => (PORT_1_START, PORT_END),
            StatsIndex::Summary => (SUMMARY_START, SUMMARY_END),
        }
    }
}

impl fmt::Display for StatsIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatsIndex::Port0 => write!(f, "port 0"),
            StatsIndex::Port1 => write!(f, "port 1"),
            StatsIndex::Summary => write!(f, "all ports"),
        }
    }
}

/// Forwarding counters of one port, or of all ports together.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PortStats {
    pub rx_packets: u64,
    pub rx_dropped: u64,
    pub rx_total: u64,
    pub tx_packets: u64,
    pub tx_dropped: u64,
    pub tx_total: u64,
}

/// Port 0, port 1 and summary counters, indexed by [`StatsIndex`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ForwarderStats([PortStats; 3]);

impl Index<StatsIndex> for ForwarderStats {
    type Output = PortStats;

    fn index(&self, index: StatsIndex) -> &PortStats {
        &self.0[index as usize]
    }
}

/// Returns the lines strictly between the first line containing `start` and
/// the first following line containing `end`.
pub fn extract_section(text: &str, start: &str, end: &str) -> Result<String> {
    let mut lines = text.lines();
    if !lines.by_ref().any(|line| line.contains(start)) {
        return Err(Error::SectionStartNotFound(start.to_string()));
    }

    let mut section = Vec::new();
    for line in lines {
        if line.contains(end) {
            return Ok(section.join("\n"));
        }
        section.push(line);
    }

    Err(Error::SectionEndNotFound {
        start: start.to_string(),
        end: end.to_string(),
    })
}

fn parse_counters(line: &str) -> Result<[u64; 3]> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let mut counters = [0u64; 3];
    for (counter, field) in counters.iter_mut().zip(COUNTER_FIELDS) {
        let value = fields.get(field).ok_or_else(|| Error::MissingField {
            line: line.to_string(),
            field,
        })?;
        *counter = value.parse().map_err(|source| Error::ParseCounter {
            line: line.to_string(),
            value: value.to_string(),
            source,
        })?;
    }
    Ok(counters)
}

/// Parses the RX and TX counter lines of one statistics section.
pub fn parse_section(section: &str) -> Result<PortStats> {
    let mut stats = PortStats::default();

    for line in section.lines() {
        if line.trim().is_empty() {
            continue;
        }

        if line.contains(RX_LINE) {
            [stats.rx_packets, stats.rx_dropped, stats.rx_total] = parse_counters(line)?;
        } else if line.contains(TX_LINE) {
            [stats.tx_packets, stats.tx_dropped, stats.tx_total] = parse_counters(line)?;
        } else {
            return Err(Error::UnexpectedLine(line.to_string()));
        }
    }

    Ok(stats)
}

/// Parses the output of testpmd's `show fwd stats all`.
pub fn parse_forwarder_stats(text: &str) -> Result<ForwarderStats> {
    let mut stats = ForwarderStats::default();

    for index in StatsIndex::ALL {
        let (start, end) = index.markers();
        stats.0[index as usize] = extract_section(text, start, end)
            .and_then(|section| parse_section(&section))
            .map_err(|e| Error::Section(index, Box::new(e)))?;
    }

    Ok(stats)
}
