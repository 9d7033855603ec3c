use std::io::{self, BufRead, BufReader, Read};

use tracing::debug;

/// Reads discrete frames off a socket: a block of header lines terminated by
/// a blank line, and — separately, once the caller knows how many bytes to
/// expect — a length-delimited body.
///
/// Line endings are tolerant of both bare `\n` and `\r\n`, so a frame ends on
/// `\n\n` or `\r\n\r\n` depending on how the peer writes lines (§6).
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { reader: BufReader::new(inner) }
    }

    /// Reads lines up to (but excluding) the first blank line and returns
    /// them joined by `"\n"`. Returns `Ok(None)` on a clean EOF with no
    /// partial frame in flight (the peer closed between frames); an EOF
    /// after some header lines were already read is reported as an error
    /// since it can't represent a complete frame.
    pub fn read_header_block(&mut self) -> io::Result<Option<String>> {
        let mut lines: Vec<String> = Vec::new();

        loop {
            let mut raw_line = String::new();
            let n = self.reader.read_line(&mut raw_line)?;
            if n == 0 {
                return if lines.is_empty() {
                    Ok(None)
                } else {
                    Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed mid-frame",
                    ))
                };
            }

            let line = raw_line.trim_end_matches(['\n', '\r']);
            if line.is_empty() {
                break;
            }
            lines.push(line.to_string());
        }

        Ok(Some(lines.join("\n")))
    }

    /// Reads exactly `len` bytes, looping on short reads — a `recv()` on a
    /// socket is free to hand back fewer bytes than requested even when more
    /// are coming. Over-reading (taking bytes belonging to the next frame)
    /// is the bug this guards against: only ever ask for the remaining
    /// count.
    pub fn read_body_exact(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let mut filled = 0;

        while filled < len {
            let n = self.reader.read(&mut buf[filled..])?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed mid-body",
                ));
            }
            filled += n;
            if filled < len {
                debug!(have = filled, want = len, "short body read, retrying");
            }
        }

        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn reads_header_block_up_to_blank_line() {
        let data = b"Content-Type: auth/request\n\nleftover-for-next-frame".to_vec();
        let mut reader = FrameReader::new(Cursor::new(data));
        let block = reader.read_header_block().unwrap().unwrap();
        assert_eq!(block, "Content-Type: auth/request");
    }

    #[test]
    fn tolerates_crlf() {
        let data = b"Content-Type: auth/request\r\n\r\n".to_vec();
        let mut reader = FrameReader::new(Cursor::new(data));
        let block = reader.read_header_block().unwrap().unwrap();
        assert_eq!(block, "Content-Type: auth/request");
    }

    #[test]
    fn clean_eof_before_any_frame_is_none() {
        let mut reader = FrameReader::new(Cursor::new(Vec::<u8>::new()));
        assert!(reader.read_header_block().unwrap().is_none());
    }

    #[test]
    fn eof_mid_frame_is_an_error() {
        let mut reader = FrameReader::new(Cursor::new(b"Content-Type: log/data".to_vec()));
        assert!(reader.read_header_block().is_err());
    }

    #[test]
    fn reads_exact_body_length_and_leaves_remainder_for_next_frame() {
        // Content-Length: 10, delivered as two separate 9-byte writes.
        let mut data = b"123456789".to_vec();
        data.extend_from_slice(b"123456789");
        data.extend_from_slice(b"NEXT-FRAME-MARKER");
        let mut reader = FrameReader::new(Cursor::new(data));

        let body = reader.read_body_exact(10).unwrap();
        assert_eq!(body, b"1234567891");

        let mut rest = Vec::new();
        reader.reader.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"23456789NEXT-FRAME-MARKER");
    }
}
