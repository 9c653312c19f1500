use std::env;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};

use crate::error::ProtoError;
use crate::Result;

/// Environment variable naming a file that mirrors every inbound byte
/// stream, for offline debugging of client traffic.
pub const VTEST_SAVE_ENV: &str = "VTEST_SAVE";

/// The 2-word frame header shared by requests and responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload length in 32-bit words, exclusive of the header itself.
    pub length_dw: u32,
    /// The opcode (request) or echoed opcode (response).
    pub cmd_id: u32,
}

impl FrameHeader {
    /// Number of bytes a header occupies on the wire.
    pub const WIRE_SIZE: usize = 8;

    fn to_bytes(self) -> [u8; Self::WIRE_SIZE] {
        let mut buf = [0u8; Self::WIRE_SIZE];
        buf[0..4].copy_from_slice(&self.length_dw.to_le_bytes());
        buf[4..8].copy_from_slice(&self.cmd_id.to_le_bytes());
        buf
    }

    fn from_bytes(buf: [u8; Self::WIRE_SIZE]) -> Self {
        FrameHeader {
            length_dw: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            cmd_id: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
        }
    }
}

fn open_save_mirror() -> Option<File> {
    let path = env::var_os(VTEST_SAVE_ENV)?;
    match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(f) => Some(f),
        Err(err) => {
            tracing::warn!(?path, %err, "failed to open VTEST_SAVE mirror file");
            None
        }
    }
}

/// Reads frames from a byte stream, looping internally over partial reads.
pub struct FrameReader<R> {
    inner: R,
    save: Option<File>,
}

impl<R: Read> FrameReader<R> {
    /// Wraps `inner`, opening the `VTEST_SAVE` mirror file if set.
    pub fn new(inner: R) -> Self {
        FrameReader {
            inner,
            save: open_save_mirror(),
        }
    }

    /// Reads exactly `buf.len()` bytes, looping over short reads. A zero-byte
    /// read (peer closed) or an early EOF is reported as [`ProtoError::Short`].
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = match self.inner.read(&mut buf[filled..]) {
                Ok(0) => return Err(ProtoError::Short),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ProtoError::Io(e)),
            };
            filled += n;
        }
        if let Some(save) = self.save.as_mut() {
            let _ = save.write_all(buf);
        }
        Ok(())
    }

    /// Reads a 2-word frame header.
    pub fn read_header(&mut self) -> Result<FrameHeader> {
        let mut buf = [0u8; FrameHeader::WIRE_SIZE];
        self.read_exact(&mut buf)?;
        Ok(FrameHeader::from_bytes(buf))
    }

    /// Reads `length_dw` payload words following a header.
    pub fn read_payload(&mut self, length_dw: u32) -> Result<Vec<u32>> {
        let mut bytes = vec![0u8; length_dw as usize * 4];
        self.read_exact(&mut bytes)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
            .collect())
    }

    /// Borrows the underlying stream, e.g. to recover a socket for fd
    /// transfer via [`crate::recv_fd`].
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Mutably borrows the underlying stream.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }
}

/// Writes frames to a byte stream.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: Write> FrameWriter<W> {
    /// Wraps `inner`.
    pub fn new(inner: W) -> Self {
        FrameWriter { inner }
    }

    /// Writes `buf` in full; fails only on a hard I/O error.
    pub fn write_exact(&mut self, buf: &[u8]) -> Result<()> {
        self.inner.write_all(buf).map_err(ProtoError::Io)
    }

    /// Writes a response/request header.
    pub fn write_header(&mut self, header: FrameHeader) -> Result<()> {
        self.write_exact(&header.to_bytes())
    }

    /// Writes a header followed by its payload words in one call.
    pub fn write_frame(&mut self, cmd_id: u32, words: &[u32]) -> Result<()> {
        self.write_header(FrameHeader {
            length_dw: words.len() as u32,
            cmd_id,
        })?;
        for w in words {
            self.write_exact(&w.to_le_bytes())?;
        }
        Ok(())
    }

    /// Writes a header-only frame (no payload words).
    pub fn write_empty(&mut self, cmd_id: u32) -> Result<()> {
        self.write_frame(cmd_id, &[])
    }

    /// Mutably borrows the underlying stream, e.g. for [`crate::send_fd`].
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trips_header_and_payload() {
        let mut buf = Vec::new();
        {
            let mut w = FrameWriter::new(&mut buf);
            w.write_frame(7, &[1, 2, 3]).unwrap();
        }
        let mut r = FrameReader::new(Cursor::new(buf));
        let header = r.read_header().unwrap();
        assert_eq!(header.cmd_id, 7);
        assert_eq!(header.length_dw, 3);
        let payload = r.read_payload(header.length_dw).unwrap();
        assert_eq!(payload, vec![1, 2, 3]);
    }

    #[test]
    fn short_read_on_truncated_frame() {
        let bytes = [0u8, 0, 0, 0]; // half a header
        let mut r = FrameReader::new(Cursor::new(bytes));
        let err = r.read_header().unwrap_err();
        assert!(matches!(err, ProtoError::Short));
    }

    #[test]
    fn empty_frame_has_no_payload_words() {
        let mut buf = Vec::new();
        FrameWriter::new(&mut buf).write_empty(42).unwrap();
        let mut r = FrameReader::new(Cursor::new(buf));
        let header = r.read_header().unwrap();
        assert_eq!(header.length_dw, 0);
        assert_eq!(header.cmd_id, 42);
    }
}
