use crate::error::Error;
use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// CRLF-terminated command lines. Decoded lines exclude the terminator;
/// a bare LF is accepted too.
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_length: usize,
}

impl LineCodec {
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }

    /// Applies to the next line decoded, including bytes already buffered
    pub fn set_max_length(&mut self, max_length: usize) {
        self.max_length = max_length;
    }
}

/// Whether a read error came from a line exceeding the codec's limit
pub fn is_line_too_long(error: &std::io::Error) -> bool {
    error.kind() == std::io::ErrorKind::InvalidData
        && error
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<Error>())
            .map_or(false, |e| matches!(e, Error::Protocol(_)))
}

impl Decoder for LineCodec {
    type Item = BytesMut;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>, Self::Error> {
        let Some(pos) = src.iter().position(|b| *b == b'\n') else {
            if src.len() > self.max_length {
                return Err(too_long(self.max_length));
            }
            return Ok(None);
        };

        if pos > self.max_length {
            return Err(too_long(self.max_length));
        }

        let mut line = src.split_to(pos + 1);
        line.truncate(pos);
        if line.last() == Some(&b'\r') {
            line.truncate(pos - 1);
        }
        Ok(Some(line))
    }
}

impl Encoder<String> for LineCodec {
    type Error = std::io::Error;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(line.len() + 2);
        dst.put_slice(line.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

fn too_long(max: usize) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        Error::Protocol(format!("line longer than {} bytes", max)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_lines() {
        let mut codec = LineCodec::new(64);
        let mut buf = BytesMut::from(&b"EHLO cam\r\nNOOP\nQU"[..]);

        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"EHLO cam");
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"NOOP");
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(&buf[..], b"QU");
    }

    #[test]
    fn rejects_long_lines() {
        let mut codec = LineCodec::new(4);
        let mut buf = BytesMut::from(&b"TOOLONG"[..]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(is_line_too_long(&err));
    }

    #[test]
    fn limit_can_change_between_lines() {
        let mut codec = LineCodec::new(4);
        let mut buf = BytesMut::from(&b"DATA\r\nLONGER LINE\r\n"[..]);

        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"DATA");
        assert!(codec.decode(&mut buf.clone()).is_err());
        codec.set_max_length(64);
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"LONGER LINE");
    }

    #[test]
    fn socket_errors_are_not_long_lines() {
        let err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(!is_line_too_long(&err));
    }

    #[test]
    fn appends_crlf() {
        let mut codec = LineCodec::new(64);
        let mut buf = BytesMut::new();
        codec.encode("250 OK".to_string(), &mut buf).unwrap();
        assert_eq!(&buf[..], b"250 OK\r\n");
    }
}
