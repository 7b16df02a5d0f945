//! Helpers for splitting a byte stream (RFC8323 §3.2) into discrete frames.
//!
//! [`Message::from_stream_bytes`](crate::Message::from_stream_bytes) expects
//! exactly one frame's worth of bytes; a TCP reader receives an unbounded
//! stream and must first work out how many bytes the next frame needs.
//! [`frame_len`] answers that incrementally as more bytes arrive.

/// Given the bytes buffered so far from a stream connection, return the
/// total length (header + extension + token + options + payload) of the
/// next frame, or `None` if not enough bytes have arrived yet to know.
pub fn frame_len(buf: &[u8]) -> Option<usize> {
  let byte1 = *buf.first()?;
  let len_nibble = byte1 >> 4;
  let tkl = (byte1 & 0b1111) as usize;

  let (ext_len, base_len): (usize, u64) = match len_nibble {
    | 13 => (1, 13),
    | 14 => (2, 269),
    | 15 => (4, 65805),
    | n => (0, n as u64),
  };

  if buf.len() < 1 + ext_len {
    return None;
  }

  let len = if ext_len == 0 {
    base_len
  } else {
    let ext = &buf[1..1 + ext_len];
    let v = ext.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64);
    base_len + v
  };

  // 1 (header) + ext_len + 1 (code) + tkl + len (options+payload)
  Some(1 + ext_len + 1 + tkl + len as usize)
}
