//! Newline-delimited frame codec.
//!
//! Wire format (both directions):
//! ```text
//! ┌──────────────────────────┬────┐
//! │ JSON object (N B, UTF-8) │ \n │   one command / response per line
//! └──────────────────────────┴────┘
//! ┌────┐
//! │ \n │                             blank line: client ends the session
//! └────┘
//! ```
//!
//! The framer accumulates incoming bytes and yields complete lines.  This
//! handles partial reads gracefully: a single `Transport::read` may return
//! part of a line, several lines, or the tail of one and the head of the
//! next.  Payload contents are not inspected here; invalid JSON is the
//! engine's business.

/// Largest read the server issues per poll.
pub const READ_CHUNK_SIZE: usize = 1024;

/// Maximum line length (protects against memory exhaustion).
pub const MAX_LINE_LEN: usize = 4096;

/// One unit yielded by [`LineFramer::feed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame<'a> {
    /// A complete, non-empty line without its terminator.
    Command(&'a [u8]),
    /// A line longer than [`MAX_LINE_LEN`] was dropped.
    Oversized { len: usize },
    /// Blank line: no further frames follow.
    Terminate,
}

/// Streaming line decoder for one connection.
pub struct LineFramer {
    buf: heapless::Vec<u8, MAX_LINE_LEN>,
    /// Length of the line being discarded, once it overflowed `buf`.
    overflow: Option<usize>,
    terminated: bool,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineFramer {
    pub fn new() -> Self {
        Self {
            buf: heapless::Vec::new(),
            overflow: None,
            terminated: false,
        }
    }

    /// Feed bytes into the framer, calling `on_frame` for every complete
    /// line in order.  Returns the number of frames yielded.
    ///
    /// After [`Frame::Terminate`] the rest of `data`, and anything fed
    /// later, is ignored.
    pub fn feed(&mut self, data: &[u8], mut on_frame: impl FnMut(Frame<'_>)) -> usize {
        let mut frames = 0;
        let mut rest = data;

        while !self.terminated && !rest.is_empty() {
            let Some(idx) = rest.iter().position(|&b| b == b'\n') else {
                self.absorb(rest);
                break;
            };
            let (line, tail) = rest.split_at(idx);
            rest = &tail[1..];
            self.absorb(line);
            frames += 1;

            if let Some(len) = self.overflow.take() {
                self.buf.clear();
                on_frame(Frame::Oversized { len });
                continue;
            }

            let line = strip_cr(&self.buf);
            if line.is_empty() {
                self.terminated = true;
                on_frame(Frame::Terminate);
            } else {
                on_frame(Frame::Command(line));
            }
            self.buf.clear();
        }

        frames
    }

    /// Whether the blank-line terminator has been seen.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Bytes of an incomplete line currently held.
    pub fn pending(&self) -> usize {
        self.overflow.unwrap_or(self.buf.len())
    }

    /// Reset framer state (e.g. for a new connection).
    pub fn reset(&mut self) {
        self.buf.clear();
        self.overflow = None;
        self.terminated = false;
    }

    fn absorb(&mut self, bytes: &[u8]) {
        if let Some(len) = self.overflow.as_mut() {
            *len += bytes.len();
            return;
        }
        if self.buf.extend_from_slice(bytes).is_err() {
            self.overflow = Some(self.buf.len() + bytes.len());
            self.buf.clear();
        }
    }
}

fn strip_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Append `payload` plus the line terminator to `out`.
pub fn encode_line(payload: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(payload);
    out.push(b'\n');
}
