// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn splits_complete_lines_and_keeps_partials() {
    let mut buffer = LineBuffer::default();
    assert_eq!(buffer.push(b"one\ntwo\npar"), vec!["one", "two"]);
    assert!(buffer.push(b"tial").is_empty());
    assert_eq!(buffer.push(b"\n"), vec!["partial"]);
    assert_eq!(buffer.finish(), None);
}

#[test]
fn finish_flushes_an_unterminated_tail() {
    let mut buffer = LineBuffer::default();
    assert!(buffer.push(b"no newline").is_empty());
    assert_eq!(buffer.finish().as_deref(), Some("no newline"));
    assert_eq!(buffer.finish(), None);
}

#[test]
fn oversized_lines_are_force_flushed() {
    let mut buffer = LineBuffer::default();
    let big = vec![b'x'; 20 * 1024];
    let lines = buffer.push(&big);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].len(), 16 * 1024);
    // The remainder stays buffered until terminated.
    assert_eq!(buffer.push(b"\n")[0].len(), 20 * 1024 - 16 * 1024);
}

#[test]
fn lossy_utf8_never_breaks_the_reader() {
    let mut buffer = LineBuffer::default();
    let lines = buffer.push(&[0xff, 0xfe, b'a', b'\n']);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].ends_with('a'));
}

#[tokio::test]
async fn drain_lines_forwards_every_line() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let data: &[u8] = b"first\nsecond\nunterminated";
    drain_lines(data, tx, |line| line).await;

    let mut lines = Vec::new();
    while let Some(line) = rx.recv().await {
        lines.push(line);
    }
    assert_eq!(lines, vec!["first", "second", "unterminated"]);
}
