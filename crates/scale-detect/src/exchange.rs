//! Low-level buffer draining and request commands shared by prober and reader

use std::io;
use std::thread;
use std::time::Duration;

use scale_format::{decode_ascii, extract, WeightMatch};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::link::ScaleLink;

/// Request commands understood by common scale protocols, in the order tried
///
/// Print, weight, status, and a bare line terminator.
pub const REQUEST_COMMANDS: [&[u8]; 4] = [b"P\r\n", b"W\r\n", b"S\r\n", b"\r\n"];

/// Largest chunk read in one call when draining exhaustively
const CHUNK_SIZE: usize = 1024;

/// How buffered input is consumed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Drain {
    /// One read of the currently buffered byte count
    Single,
    /// Chunked reads until the buffer reports empty
    Exhaustive,
}

/// A weight together with the trimmed text it came from
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Found {
    pub matched: WeightMatch,
    pub raw: String,
}

fn read_text(link: &mut dyn ScaleLink, len: usize) -> io::Result<Option<String>> {
    let mut buf = vec![0u8; len];
    let n = link.read_bytes(&mut buf)?;
    if n == 0 {
        return Ok(None);
    }
    trace!("Read {} bytes: {:?}", n, String::from_utf8_lossy(&buf[..n]));
    Ok(Some(decode_ascii(&buf[..n])))
}

fn extract_trimmed(text: &str) -> Option<Found> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    extract(text).map(|matched| Found {
        matched,
        raw: trimmed.to_string(),
    })
}

/// Drain `pending` buffered bytes and run the extractor over them
pub(crate) fn drain(link: &mut dyn ScaleLink, pending: usize, mode: Drain) -> io::Result<Option<Found>> {
    match mode {
        Drain::Single => Ok(read_text(link, pending)?.and_then(|t| extract_trimmed(&t))),
        Drain::Exhaustive => {
            let mut pending = pending;
            while pending > 0 {
                let Some(text) = read_text(link, pending.min(CHUNK_SIZE))? else {
                    break;
                };
                if let Some(found) = extract_trimmed(&text) {
                    return Ok(Some(found));
                }
                pending = link.bytes_to_read()?;
            }
            Ok(None)
        }
    }
}

/// Drain whatever is buffered right now, if anything
pub(crate) fn drain_pending(link: &mut dyn ScaleLink, mode: Drain) -> io::Result<Option<Found>> {
    match link.bytes_to_read()? {
        0 => Ok(None),
        pending => drain(link, pending, mode),
    }
}

/// Send one request command, wait `settle`, and check for a reply
pub(crate) fn request(
    link: &mut dyn ScaleLink,
    command: &[u8],
    settle: Duration,
    mode: Drain,
) -> io::Result<Option<Found>> {
    link.clear_input()?;
    link.write_bytes(command)?;
    if !settle.is_zero() {
        thread::sleep(settle);
    }
    drain_pending(link, mode)
}
