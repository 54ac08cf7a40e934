//! Engine log stream framing.
//!
//! Each frame is an 8-byte header followed by the payload: byte 0 is the
//! stream (1 stdout, 2 stderr), bytes 4..8 the big-endian payload length.

pub const STDOUT: u8 = 1;
pub const STDERR: u8 = 2;
const HEADER_LEN: usize = 8;

/// Concatenate the stdout and stderr payloads of `bytes`.
///
/// Frames for other streams are skipped and a truncated trailing frame is
/// dropped.
pub fn decode_frames(bytes: &[u8]) -> String {
    let mut out = Vec::with_capacity(bytes.len());
    let mut rest = bytes;
    while rest.len() >= HEADER_LEN {
        let stream = rest[0];
        let len = u32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
        let Some(payload) = rest.get(HEADER_LEN..HEADER_LEN + len) else {
            break;
        };
        if stream == STDOUT || stream == STDERR {
            out.extend_from_slice(payload);
        }
        rest = &rest[HEADER_LEN + len..];
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Append one frame for `stream` to `buf`.
pub fn encode_frame(buf: &mut Vec<u8>, stream: u8, payload: &[u8]) {
    let len = u32::try_from(payload.len()).unwrap_or(u32::MAX) as usize;
    buf.extend_from_slice(&[stream, 0, 0, 0]);
    buf.extend_from_slice(&(len as u32).to_be_bytes());
    buf.extend_from_slice(&payload[..len]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_decodes_to_empty_string() {
        assert_eq!(decode_frames(&[]), "");
    }

    #[test]
    fn concatenates_stdout_and_stderr_payloads() {
        let mut buf = Vec::new();
        encode_frame(&mut buf, STDOUT, b"hello ");
        encode_frame(&mut buf, STDERR, b"warn ");
        encode_frame(&mut buf, STDOUT, b"world");
        assert_eq!(decode_frames(&buf), "hello warn world");
    }

    #[test]
    fn truncated_final_frame_is_dropped() {
        let mut buf = Vec::new();
        encode_frame(&mut buf, STDOUT, b"complete");
        encode_frame(&mut buf, STDOUT, b"partial payload");
        buf.truncate(buf.len() - 3);
        assert_eq!(decode_frames(&buf), "complete");

        let mut header_only = Vec::new();
        encode_frame(&mut header_only, STDOUT, b"x");
        header_only.extend_from_slice(&[1, 0, 0]);
        assert_eq!(decode_frames(&header_only), "x");
    }

    #[test]
    fn other_streams_are_skipped() {
        let mut buf = Vec::new();
        encode_frame(&mut buf, 0, b"stdin");
        encode_frame(&mut buf, STDOUT, b"out");
        assert_eq!(decode_frames(&buf), "out");
    }
}
