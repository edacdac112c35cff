// Copyright © 2024 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use std::sync::LazyLock;

use regex::Regex;

use crate::{Error, Result};

pub const SERVER_RESPONSE_MARKER: &str = "Server Response:";
const BLANK_LINE: &str = "\n\n";

static CONTROL_SEQUENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").expect("control sequence pattern is valid")
});

/// Removes ANSI CSI sequences and carriage returns.
pub fn strip_control_sequences(text: &str) -> String {
    CONTROL_SEQUENCE.replace_all(text, "").replace('\r', "")
}

/// Extracts the JSON reply to `request_key` from a verbose TRex console
/// transcript.
///
/// The reply is the block following the first `Server Response:` marker after
/// the request, delimited by blank lines.
pub fn extract_json(text: &str, request_key: &str) -> Result<String> {
    let text = strip_control_sequences(text);

    let request = text
        .find(request_key)
        .ok_or_else(|| Error::RequestNotFound(request_key.to_string()))?;
    let after_request = &text[request + request_key.len()..];

    let marker = after_request
        .find(SERVER_RESPONSE_MARKER)
        .ok_or_else(|| Error::ResponseMarkerNotFound(request_key.to_string()))?;
    let after_marker = &after_request[marker + SERVER_RESPONSE_MARKER.len()..];

    let start = after_marker
        .find(BLANK_LINE)
        .ok_or_else(|| Error::ResponseStartNotFound(request_key.to_string()))?;
    let body = &after_marker[start + BLANK_LINE.len()..];

    let end = body
        .find(BLANK_LINE)
        .ok_or_else(|| Error::ResponseEndNotFound(request_key.to_string()))?;

    Ok(body[..end].trim().to_string())
}
