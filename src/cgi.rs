// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! CGI glue: channel selection from the query string and the response
//! written back to the web server.

use crate::error::{CaptureError, Result};
use std::io::Write;

/// Header preceding the image in a CGI response.
pub const CONTENT_TYPE_HEADER: &str = "Content-type: image/jpeg\n\n";

/// Parses the channel out of a query string such as `ch=1&t=155000000&ext=.jpeg`.
///
/// The value runs from the first `=` to the first `&`, or to the end of the
/// string when there is no `&`.
pub fn channel_from_query(query: &str) -> Result<u32> {
    let invalid = |why: &str| CaptureError::Query(format!("{why} in {query:?}"));

    let start = query.find('=').ok_or_else(|| invalid("no channel value"))? + 1;
    let end = query.find('&').unwrap_or(query.len());
    if end <= start {
        return Err(invalid("empty channel value"));
    }
    query[start..end]
        .trim()
        .parse::<u32>()
        .map_err(|err| invalid(&format!("bad channel ({err})")))
}

/// Writes `payload` to `out`, preceded by [`CONTENT_TYPE_HEADER`] when
/// `header` is set.
pub fn write_response<W: Write>(out: &mut W, payload: &[u8], header: bool) -> Result<()> {
    if header {
        out.write_all(CONTENT_TYPE_HEADER.as_bytes())?;
    }
    out.write_all(payload)?;
    out.flush()?;
    Ok(())
}
