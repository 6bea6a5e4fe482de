//! Incremental frame assembler for the line protocol.
//!
//! Clients write frames back to back with no length prefix, so a single read may
//! hold half a frame or several of them. The codec keeps the unread bytes and
//! resumes scanning where it stopped.

use std::io;

use tokio_util::{
    bytes::{Buf, BytesMut},
    codec::Decoder,
};

use super::msg::{JobPayload, JOB_TAG};
use crate::error::ProtocolError;

/// Control frame that closes the connection. Matched by prefix.
pub const EXIT: &[u8] = b"EXIT";

const SEPARATOR: u8 = b'|';
const TAG_LEN: usize = 2;
const MARKERS: [&[u8]; 2] = [EXIT, b"2_|"];

/// A complete, well-formed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Exit,
    Job(JobPayload),
}

/// Builds the wire form of a job frame, `2_|<field>|<json>`.
///
/// # Arguments
/// * `field` - The free-form middle field, clients send their username.
/// * `payload` - The job description.
pub fn encode_job_frame(field: &str, payload: &JobPayload) -> serde_json::Result<Vec<u8>> {
    let body = serde_json::to_vec(payload)?;

    let mut frame = Vec::with_capacity(TAG_LEN + field.len() + body.len() + 2);
    frame.extend_from_slice(JOB_TAG.as_bytes());
    frame.push(SEPARATOR);
    frame.extend_from_slice(field.as_bytes());
    frame.push(SEPARATOR);
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Brace matching state for a JSON body that may arrive in pieces.
#[derive(Debug)]
struct BodyScan {
    start: usize,
    pos: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl BodyScan {
    fn new(start: usize) -> Self {
        Self {
            start,
            pos: start,
            depth: 0,
            in_string: false,
            escaped: false,
        }
    }

    /// Resumes scanning `buf` from where the previous call stopped.
    ///
    /// # Returns
    /// The index one past the brace that closes the body, if it was reached.
    fn advance(&mut self, buf: &[u8]) -> Option<usize> {
        while self.pos < buf.len() {
            let byte = buf[self.pos];
            self.pos += 1;

            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                }
                continue;
            }

            match byte {
                b'"' => self.in_string = true,
                b'{' => self.depth += 1,
                b'}' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        return Some(self.pos);
                    }
                }
                _ => {}
            }
        }

        None
    }

    /// The same scan, positioned at the start of a buffer whose scanned bytes were dropped.
    fn rebased(self) -> Self {
        Self {
            start: 0,
            pos: 0,
            ..self
        }
    }
}

/// Where an oversized frame was cut off. Its remaining bytes are dropped without
/// being searched for frame starts.
#[derive(Debug)]
enum Discard {
    /// Inside `<tag>|<field>|`, with `seps` separators seen.
    Head { seps: usize },
    /// Past the second separator, before the body.
    Gap,
    Body(BodyScan),
}

impl Discard {
    /// Walks the rest of the oversized frame at the front of `buf`.
    ///
    /// # Returns
    /// How many bytes belong to the frame, and whether its end was reached. When it
    /// was not, every byte of `buf` belongs to it.
    fn advance(&mut self, buf: &[u8]) -> (usize, bool) {
        let mut i = 0;

        loop {
            match self {
                Self::Head { seps } => {
                    let Some(&byte) = buf.get(i) else {
                        return (i, false);
                    };
                    i += 1;

                    if byte == b'\n' {
                        return (i, true);
                    }
                    if byte == SEPARATOR {
                        *seps += 1;
                        if *seps >= 2 {
                            *self = Self::Gap;
                        }
                    }
                }
                Self::Gap => match buf.get(i) {
                    None => return (i, false),
                    Some(&b'{') => *self = Self::Body(BodyScan::new(i)),
                    Some(b) if b.is_ascii_whitespace() => i += 1,
                    Some(_) => return (i, true),
                },
                Self::Body(scan) => {
                    return match scan.advance(buf) {
                        Some(end) => (end, true),
                        None => {
                            scan.pos = 0;
                            (buf.len(), false)
                        }
                    };
                }
            }
        }
    }
}

/// What looking at the head of the buffer produced.
enum Head {
    Wait,
    Done(Result<Frame, ProtocolError>),
    Body(usize),
}

/// Splits a byte stream into frames.
///
/// Malformed input is yielded as an `Err` item instead of a decoder error, so a
/// `FramedRead` keeps going after it.
#[derive(Debug)]
pub struct FrameCodec {
    max_len: usize,
    pending: Option<BodyScan>,
    discard: Option<Discard>,
}

impl FrameCodec {
    /// Creates a new `FrameCodec`.
    ///
    /// # Arguments
    /// * `max_len` - The largest frame that will be buffered before it is discarded.
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len,
            pending: None,
            discard: None,
        }
    }

    fn open_frame(&mut self, src: &mut BytesMut) -> Head {
        let skip = src
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(src.len());
        src.advance(skip);

        if src.is_empty() {
            return Head::Wait;
        }

        if src.starts_with(EXIT) {
            let end = line_end(src, 0).unwrap_or(src.len());
            src.advance(end);
            return Head::Done(Ok(Frame::Exit));
        }

        if (src.len() < EXIT.len() && EXIT.starts_with(&src[..])) || src.len() <= TAG_LEN {
            return Head::Wait;
        }

        if !is_frame_start(src) {
            let discarded = resync_point(src, 1);
            src.advance(discarded);
            return Head::Done(Err(ProtocolError::Garbage { discarded }));
        }

        let field_start = TAG_LEN + 1;
        let Some(offset) = src[field_start..]
            .iter()
            .position(|&b| b == SEPARATOR || b == b'\n')
        else {
            return self.wait_or_overflow(src, Discard::Head { seps: 1 });
        };

        let sep = field_start + offset;
        if src[sep] == b'\n' {
            src.advance(sep + 1);
            return Head::Done(Err(ProtocolError::MissingDelimiter));
        }

        let Some(body) = src[sep + 1..]
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .map(|i| sep + 1 + i)
        else {
            return self.wait_or_overflow(src, Discard::Gap);
        };

        if src[body] != b'{' {
            let discarded = resync_point(src, body);
            src.advance(discarded);
            return Head::Done(Err(ProtocolError::NotAnObject));
        }

        Head::Body(body)
    }

    /// Drops the buffered part of a frame that grew past `max_len`.
    ///
    /// `rest` tells how to recognise the end of the frame once more of it arrives.
    fn wait_or_overflow(&mut self, src: &mut BytesMut, rest: Discard) -> Head {
        if src.len() <= self.max_len {
            return Head::Wait;
        }

        self.pending = None;
        self.discard = Some(rest);
        let len = src.len();
        src.clear();
        Head::Done(Err(ProtocolError::TooLong {
            len,
            max: self.max_len,
        }))
    }
}

impl Decoder for FrameCodec {
    type Item = Result<Frame, ProtocolError>;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<Self::Item>> {
        if let Some(discard) = self.discard.as_mut() {
            let (consumed, done) = discard.advance(src);
            src.advance(consumed);
            if !done {
                return Ok(None);
            }
            self.discard = None;
        }

        if self.pending.is_none() {
            match self.open_frame(src) {
                Head::Wait => return Ok(None),
                Head::Done(item) => return Ok(Some(item)),
                Head::Body(start) => self.pending = Some(BodyScan::new(start)),
            }
        }

        let Some(scan) = self.pending.as_mut() else {
            return Ok(None);
        };

        match scan.advance(src) {
            Some(end) => {
                let body = scan.start;
                self.pending = None;
                let frame = src.split_to(end);
                Ok(Some(parse_frame(&frame, body)))
            }
            None if src.len() <= self.max_len => Ok(None),
            None => {
                let rest = self
                    .pending
                    .take()
                    .map_or(Discard::Gap, |scan| Discard::Body(scan.rebased()));
                match self.wait_or_overflow(src, rest) {
                    Head::Done(item) => Ok(Some(item)),
                    _ => Ok(None),
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> io::Result<Option<Self::Item>> {
        if let Some(item) = self.decode(buf)? {
            return Ok(Some(item));
        }

        self.pending = None;
        self.discard = None;
        let leftover = buf.iter().any(|b| !b.is_ascii_whitespace());
        let len = buf.len();
        buf.clear();

        if leftover {
            Ok(Some(Err(ProtocolError::Truncated { len })))
        } else {
            Ok(None)
        }
    }
}

fn parse_frame(frame: &[u8], body: usize) -> Result<Frame, ProtocolError> {
    let tag = &frame[..TAG_LEN];
    if tag != JOB_TAG.as_bytes() {
        return Err(ProtocolError::UnknownTag(
            String::from_utf8_lossy(tag).into_owned(),
        ));
    }

    let payload = serde_json::from_slice(&frame[body..])?;
    Ok(Frame::Job(payload))
}

fn is_frame_start(buf: &[u8]) -> bool {
    buf.len() > TAG_LEN
        && buf[TAG_LEN] == SEPARATOR
        && buf[..TAG_LEN]
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || *b == b'_')
}

fn line_end(buf: &[u8], from: usize) -> Option<usize> {
    buf[from..]
        .iter()
        .position(|&b| b == b'\n')
        .map(|i| from + i + 1)
}

/// Finds how many bytes to drop so the buffer starts at a plausible frame again.
///
/// Cuts after the next newline or right before the next known frame start,
/// whichever comes first. With neither in sight, everything is dropped except a
/// tail that could still grow into a frame start.
fn resync_point(buf: &[u8], from: usize) -> usize {
    let marker = (from..buf.len()).find(|&i| MARKERS.iter().any(|m| buf[i..].starts_with(m)));
    let newline = line_end(buf, from);

    match (marker, newline) {
        (Some(m), Some(n)) => m.min(n),
        (Some(m), None) => m,
        (None, Some(n)) => n,
        (None, None) => (from..buf.len())
            .find(|&i| MARKERS.iter().any(|m| m.starts_with(&buf[i..])))
            .unwrap_or(buf.len()),
    }
}
