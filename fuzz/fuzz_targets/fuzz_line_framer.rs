//! Fuzz target: `LineFramer::feed`
//!
//! Drives arbitrary byte sequences into the line framer, split at an
//! input-chosen point, and asserts that it never panics, never yields a
//! line longer than `MAX_LINE_LEN` or containing a newline, and yields the
//! same frames regardless of where the input was split.
//!
//! cargo fuzz run fuzz_line_framer

#![no_main]

use libfuzzer_sys::fuzz_target;
use pinlink::rpc::codec::{Frame, LineFramer, MAX_LINE_LEN};

#[derive(Debug, PartialEq)]
enum Owned {
    Command(Vec<u8>),
    Oversized(usize),
    Terminate,
}

fn collect(framer: &mut LineFramer, chunks: &[&[u8]]) -> Vec<Owned> {
    let mut frames = Vec::new();
    for chunk in chunks {
        framer.feed(chunk, |frame| {
            frames.push(match frame {
                Frame::Command(line) => {
                    assert!(!line.is_empty(), "framer must not yield empty commands");
                    assert!(line.len() <= MAX_LINE_LEN, "line exceeds MAX_LINE_LEN");
                    assert!(!line.contains(&b'\n'), "line contains its terminator");
                    Owned::Command(line.to_vec())
                }
                Frame::Oversized { len } => {
                    assert!(len > MAX_LINE_LEN, "oversized frame within limit");
                    Owned::Oversized(len)
                }
                Frame::Terminate => Owned::Terminate,
            });
        });
    }
    frames
}

fuzz_target!(|data: &[u8]| {
    let Some((&split, body)) = data.split_first() else {
        return;
    };
    let cut = usize::from(split).min(body.len());

    let mut whole = LineFramer::new();
    let expected = collect(&mut whole, &[body]);

    let mut pieces = LineFramer::new();
    let actual = collect(&mut pieces, &[&body[..cut], &body[cut..]]);
    assert_eq!(expected, actual, "framing depends on read boundaries");
    assert_eq!(whole.is_terminated(), pieces.is_terminated());

    // After a reset the framer must accept bytes cleanly again.
    pieces.reset();
    assert_eq!(pieces.pending(), 0);
    let _ = collect(&mut pieces, &[body]);
});
