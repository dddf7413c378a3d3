//! Stream framing: splitting a TCP byte stream into complete messages.
//!
//! A frame is located from its `8=FIX.4.2` prefix, sized from the
//! `9=<BodyLength>` field, and closed by the fixed-width `10=NNN<SOH>`
//! trailer. Partial frames stay buffered until more bytes arrive; bytes
//! that cannot open a frame are discarded so the splitter resynchronizes
//! after garbage.

use crate::message::SOH;
use thiserror::Error;

const HEADER: &[u8] = b"8=FIX.4.2\x01";
/// "10=NNN<SOH>"
const TRAILER_LEN: usize = 7;
/// Upper bound on a plausible BodyLength digit run ("9=" + digits + SOH).
const MAX_BODY_DIGITS: usize = 8;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The peer sent more unframed bytes than we are willing to buffer.
    #[error("frame buffer overflow: {0} bytes without a complete message")]
    Overflow(usize),
}

/// Accumulates inbound bytes and yields complete frames.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
    capacity: usize,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::with_capacity(64 * 1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::new(),
            capacity,
        }
    }

    /// Append bytes read from the socket.
    pub fn push(&mut self, data: &[u8]) -> Result<(), FrameError> {
        if self.buf.len() + data.len() > self.capacity {
            return Err(FrameError::Overflow(self.buf.len() + data.len()));
        }
        self.buf.extend_from_slice(data);
        Ok(())
    }

    /// Bytes currently buffered (partial frame or garbage awaiting resync).
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete frame, if one is buffered.
    ///
    /// Garbage ahead of a frame header is dropped. A header whose
    /// BodyLength field is unparseable is skipped so the scan can recover
    /// at the next header.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            self.discard_to_header();
            if self.buf.is_empty() {
                return None;
            }

            match self.frame_len() {
                FrameScan::Complete(len) => {
                    let frame: Vec<u8> = self.buf.drain(..len).collect();
                    return Some(frame);
                }
                FrameScan::NeedMore => return None,
                FrameScan::BadHeader => {
                    // Skip this header byte and rescan from the next one.
                    self.buf.drain(..1);
                }
            }
        }
    }

    /// Drop bytes until the buffer starts with a frame header (or with a
    /// prefix of one, when the header may still be completing).
    fn discard_to_header(&mut self) {
        if self.buf.starts_with(HEADER) || HEADER.starts_with(&self.buf) {
            return;
        }
        if let Some(pos) = self
            .buf
            .windows(HEADER.len())
            .position(|w| w == HEADER)
        {
            self.buf.drain(..pos);
            return;
        }
        // No full header: keep only a tail that could be a partial one.
        let keep = (0..HEADER.len().min(self.buf.len()))
            .rev()
            .map(|n| self.buf.len() - n - 1)
            .find(|start| HEADER.starts_with(&self.buf[*start..]))
            .unwrap_or(self.buf.len());
        self.buf.drain(..keep);
    }

    fn frame_len(&self) -> FrameScan {
        // Past the fixed header: expect "9=<digits><SOH>".
        let rest = &self.buf[HEADER.len().min(self.buf.len())..];
        if self.buf.len() < HEADER.len() + 2 {
            return FrameScan::NeedMore;
        }
        if !rest.starts_with(b"9=") {
            return FrameScan::BadHeader;
        }
        let digits = &rest[2..];
        let soh_pos = match digits.iter().position(|b| *b == SOH) {
            Some(pos) => pos,
            None if digits.len() > MAX_BODY_DIGITS => return FrameScan::BadHeader,
            None => return FrameScan::NeedMore,
        };
        if soh_pos == 0 || soh_pos > MAX_BODY_DIGITS || !digits[..soh_pos].iter().all(u8::is_ascii_digit) {
            return FrameScan::BadHeader;
        }
        let body_len: usize = match std::str::from_utf8(&digits[..soh_pos])
            .ok()
            .and_then(|s| s.parse().ok())
        {
            Some(len) => len,
            None => return FrameScan::BadHeader,
        };

        let total = HEADER.len() + 2 + soh_pos + 1 + body_len + TRAILER_LEN;
        if self.buf.len() < total {
            FrameScan::NeedMore
        } else {
            FrameScan::Complete(total)
        }
    }
}

enum FrameScan {
    Complete(usize),
    NeedMore,
    BadHeader,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode, Envelope};
    use crate::message::MsgType;

    fn heartbeat(seq: u64) -> Vec<u8> {
        encode(
            &Envelope {
                msg_type: MsgType::Heartbeat,
                sender: "CLIENT",
                target: "EXCHANGE",
                seq,
                sending_time: "20240216-22:44:16",
            },
            &[],
        )
    }

    #[test]
    fn single_frame() {
        let msg = heartbeat(1);
        let mut fb = FrameBuffer::new();
        fb.push(&msg).unwrap();
        assert_eq!(fb.next_frame(), Some(msg));
        assert_eq!(fb.next_frame(), None);
        assert_eq!(fb.pending(), 0);
    }

    #[test]
    fn concatenated_frames_split() {
        let a = heartbeat(1);
        let b = heartbeat(2);
        let mut stream = a.clone();
        stream.extend_from_slice(&b);

        let mut fb = FrameBuffer::new();
        fb.push(&stream).unwrap();
        assert_eq!(fb.next_frame(), Some(a));
        assert_eq!(fb.next_frame(), Some(b));
        assert_eq!(fb.next_frame(), None);
    }

    #[test]
    fn partial_delivery_buffers() {
        let msg = heartbeat(1);
        let mut fb = FrameBuffer::new();
        for chunk in msg.chunks(3) {
            assert_eq!(fb.next_frame(), None);
            fb.push(chunk).unwrap();
        }
        assert_eq!(fb.next_frame(), Some(msg));
    }

    #[test]
    fn garbage_prefix_resync() {
        let msg = heartbeat(1);
        let mut stream = b"\r\nHELLO".to_vec();
        stream.extend_from_slice(&msg);

        let mut fb = FrameBuffer::new();
        fb.push(&stream).unwrap();
        assert_eq!(fb.next_frame(), Some(msg));
    }

    #[test]
    fn bad_body_length_skipped() {
        let msg = heartbeat(1);
        let mut stream = b"8=FIX.4.2\x019=xx\x01".to_vec();
        stream.extend_from_slice(&msg);

        let mut fb = FrameBuffer::new();
        fb.push(&stream).unwrap();
        assert_eq!(fb.next_frame(), Some(msg));
    }

    #[test]
    fn overflow_reported() {
        let mut fb = FrameBuffer::with_capacity(8);
        assert!(matches!(
            fb.push(b"123456789"),
            Err(FrameError::Overflow(9))
        ));
    }

    #[test]
    fn partial_header_is_retained() {
        let msg = heartbeat(1);
        let (head, tail) = msg.split_at(4);

        let mut fb = FrameBuffer::new();
        fb.push(b"garbage").unwrap();
        fb.push(head).unwrap();
        assert_eq!(fb.next_frame(), None);
        fb.push(tail).unwrap();
        assert_eq!(fb.next_frame(), Some(msg));
    }
}
