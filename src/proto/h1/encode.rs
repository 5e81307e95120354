use std::fmt;

/// 请求体编码器，决定每个数据块写到线上时的分帧方式。
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Encoder {
    kind: Kind,
}

#[derive(Debug, PartialEq, Clone)]
enum Kind {
    /// 使用 `Transfer-Encoding: chunked` 分块
    Chunked,
    /// 使用 `Content-Length`，记录剩余字节数
    Length(u64),
}

/// 请求体写出的字节数超过了 `Content-Length`，或结束时仍有剩余。
#[derive(Debug)]
pub(crate) struct LengthMismatch {
    remaining: u64,
}

impl Encoder {
    fn new(kind: Kind) -> Encoder {
        Encoder { kind }
    }

    pub(crate) fn chunked() -> Encoder {
        Encoder::new(Kind::Chunked)
    }

    pub(crate) fn length(len: u64) -> Encoder {
        Encoder::new(Kind::Length(len))
    }

    /// 请求体已经全部写出（只有定长编码器会在写完后自动结束）。
    pub(crate) fn is_eof(&self) -> bool {
        matches!(self.kind, Kind::Length(0))
    }

    pub(crate) fn is_chunked(&self) -> bool {
        matches!(self.kind, Kind::Chunked)
    }

    /// 将一个数据块按当前分帧方式追加到 `dst`。
    pub(crate) fn encode(&mut self, chunk: &[u8], dst: &mut Vec<u8>) -> Result<(), LengthMismatch> {
        let len = chunk.len() as u64;
        if len == 0 {
            // 空块在 chunked 中意味着结束，不能直接写出
            return Ok(());
        }
        match self.kind {
            Kind::Chunked => {
                trace!("encoding chunked {}B", len);
                dst.extend_from_slice(format!("{:X}\r\n", len).as_bytes());
                dst.extend_from_slice(chunk);
                dst.extend_from_slice(b"\r\n");
            }
            Kind::Length(ref mut remaining) => {
                trace!("sized write, len = {}", len);
                if len > *remaining {
                    return Err(LengthMismatch { remaining: *remaining });
                }
                *remaining -= len;
                dst.extend_from_slice(chunk);
            }
        }
        Ok(())
    }

    /// 结束请求体。chunked 写出终止块，定长编码器要求所有字节都已写出。
    pub(crate) fn end(&self, dst: &mut Vec<u8>) -> Result<(), LengthMismatch> {
        match self.kind {
            Kind::Chunked => {
                dst.extend_from_slice(b"0\r\n\r\n");
                Ok(())
            }
            Kind::Length(0) => Ok(()),
            Kind::Length(remaining) => Err(LengthMismatch { remaining }),
        }
    }
}

impl fmt::Display for LengthMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "body length mismatch ({} bytes remaining)", self.remaining)
    }
}

impl std::error::Error for LengthMismatch {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunked() {
        let mut encoder = Encoder::chunked();
        let mut dst = Vec::new();

        encoder.encode(b"foo bar", &mut dst).unwrap();
        encoder.encode(b"", &mut dst).unwrap();
        encoder.encode(&[b'x'; 26], &mut dst).unwrap();
        encoder.end(&mut dst).unwrap();

        let mut expected = b"7\r\nfoo bar\r\n1A\r\n".to_vec();
        expected.extend_from_slice(&[b'x'; 26]);
        expected.extend_from_slice(b"\r\n0\r\n\r\n");
        assert_eq!(dst, expected);
    }

    #[test]
    fn length() {
        let mut encoder = Encoder::length(8);
        let mut dst = Vec::new();

        encoder.encode(b"foo ", &mut dst).unwrap();
        assert!(!encoder.is_eof());
        assert!(encoder.end(&mut dst).is_err());

        encoder.encode(b"bar!", &mut dst).unwrap();
        assert!(encoder.is_eof());
        encoder.end(&mut dst).unwrap();
        assert_eq!(dst, b"foo bar!");

        assert!(encoder.encode(b"x", &mut dst).is_err());
    }
}
