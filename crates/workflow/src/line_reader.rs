// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded line buffering for subprocess output.
//!
//! A child can fill one of its stdout/stderr pipes beyond capacity while
//! the parent waits for a newline on the other, deadlocking both. The two
//! streams are therefore drained concurrently with a size-bounded buffer:
//! when a line exceeds the cap, the partial line is flushed as-is instead
//! of waiting for its terminator.

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

/// Cap on a buffered, unterminated line.
const MAX_LINE_LEN: usize = 16 * 1024;

const READ_CHUNK: usize = 8 * 1024;

/// Splits a byte stream into lines with a bounded carry-over buffer.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Feed a chunk; returns every completed line (terminators stripped).
    /// Oversized partial lines are force-flushed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for byte in chunk {
            if *byte == b'\n' {
                lines.push(take_line(&mut self.pending));
            } else {
                self.pending.push(*byte);
                if self.pending.len() >= MAX_LINE_LEN {
                    lines.push(take_line(&mut self.pending));
                }
            }
        }
        lines
    }

    /// Flush whatever is left at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(take_line(&mut self.pending))
        }
    }
}

fn take_line(pending: &mut Vec<u8>) -> String {
    let bytes = std::mem::take(pending);
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Drain a stream into the channel, one message per line.
pub(crate) async fn drain_lines<R, T>(
    mut reader: R,
    tx: mpsc::UnboundedSender<T>,
    wrap: impl Fn(String) -> T,
) where
    R: AsyncRead + Unpin,
{
    let mut buffer = LineBuffer::default();
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                for line in buffer.push(&chunk[..n]) {
                    if tx.send(wrap(line)).is_err() {
                        return;
                    }
                }
            }
        }
    }
    if let Some(line) = buffer.finish() {
        let _ = tx.send(wrap(line));
    }
}

#[cfg(test)]
#[path = "line_reader_tests.rs"]
mod tests;
