//! Multiplexed stdout/stderr frame codec.
//!
//! Non-TTY attach and exec streams interleave both output channels in one
//! byte stream. Each frame is an 8-byte header followed by the payload:
//!
//! ```text
//! [stream_type u8][0 u8][0 u8][0 u8][payload_len u32 big-endian][payload...]
//! ```
//!
//! Frames can be split arbitrarily across transport chunks, so the decoder
//! buffers partial frames between calls.

/// Which output channel a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StdStream {
    Stdin,
    Stdout,
    Stderr,
}

impl StdStream {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Stdin),
            1 => Some(Self::Stdout),
            2 => Some(Self::Stderr),
            _ => None,
        }
    }

    fn as_byte(self) -> u8 {
        match self {
            Self::Stdin => 0,
            Self::Stdout => 1,
            Self::Stderr => 2,
        }
    }
}

const HEADER_LEN: usize = 8;

/// Encode one frame.
pub fn encode_frame(stream: StdStream, payload: &[u8]) -> Vec<u8> {
    let len = u32::try_from(payload.len()).unwrap_or(u32::MAX) as usize;
    let mut frame = Vec::with_capacity(HEADER_LEN + len);
    frame.push(stream.as_byte());
    frame.extend_from_slice(&[0, 0, 0]);
    frame.extend_from_slice(&(len as u32).to_be_bytes());
    frame.extend_from_slice(&payload[..len]);
    frame
}

/// Incremental frame decoder.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a transport chunk and return every frame it completed.
    ///
    /// A header with an unknown stream type is treated as stdout rather than
    /// desynchronising the rest of the stream.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<(StdStream, Vec<u8>)> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        let mut offset = 0;

        while self.buf.len() - offset >= HEADER_LEN {
            let header = &self.buf[offset..offset + HEADER_LEN];
            let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
            if self.buf.len() - offset - HEADER_LEN < len {
                break;
            }
            let stream = StdStream::from_byte(header[0]).unwrap_or(StdStream::Stdout);
            let start = offset + HEADER_LEN;
            frames.push((stream, self.buf[start..start + len].to_vec()));
            offset = start + len;
        }

        self.buf.drain(..offset);
        frames
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_interleaved_frames() {
        let mut bytes = encode_frame(StdStream::Stdout, b"hello\n");
        bytes.extend(encode_frame(StdStream::Stderr, b"oops\n"));

        let mut dec = FrameDecoder::new();
        let frames = dec.push(&bytes);
        assert_eq!(
            frames,
            vec![
                (StdStream::Stdout, b"hello\n".to_vec()),
                (StdStream::Stderr, b"oops\n".to_vec()),
            ]
        );
        assert_eq!(dec.pending(), 0);
    }

    #[test]
    fn frames_split_across_chunks() {
        let bytes = encode_frame(StdStream::Stderr, b"partial payload");
        let mut dec = FrameDecoder::new();

        assert!(dec.push(&bytes[..3]).is_empty());
        assert!(dec.push(&bytes[3..12]).is_empty());
        assert_eq!(dec.pending(), 12);

        let frames = dec.push(&bytes[12..]);
        assert_eq!(frames, vec![(StdStream::Stderr, b"partial payload".to_vec())]);
        assert_eq!(dec.pending(), 0);
    }

    #[test]
    fn empty_payload_frame() {
        let mut dec = FrameDecoder::new();
        let frames = dec.push(&encode_frame(StdStream::Stdout, b""));
        assert_eq!(frames, vec![(StdStream::Stdout, Vec::new())]);
    }

    #[test]
    fn unknown_stream_type_maps_to_stdout() {
        let mut frame = encode_frame(StdStream::Stdout, b"x");
        frame[0] = 7;
        let mut dec = FrameDecoder::new();
        assert_eq!(dec.push(&frame), vec![(StdStream::Stdout, b"x".to_vec())]);
    }
}
