use std::io;
use std::io::Read;

/// Little-endian primitive reads over a byte stream.
pub struct StreamReader<R: Read> {
    inner: R,
}

impl<R: Read> StreamReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    pub fn read_bytes<const N: usize>(&mut self) -> io::Result<[u8; N]> {
        let mut buffer = [0u8; N];
        self.inner.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    pub fn read_u32(&mut self) -> io::Result<u32> {
        Ok(u32::from_le_bytes(self.read_bytes::<4>()?))
    }

    pub fn read_u64(&mut self) -> io::Result<u64> {
        Ok(u64::from_le_bytes(self.read_bytes::<8>()?))
    }

    /// Reads `length` bytes holding a zero-terminated string.
    pub fn read_fixed_string(&mut self, length: usize) -> io::Result<String> {
        let mut buffer = vec![0u8; length];
        self.inner.read_exact(&mut buffer)?;

        let end = buffer.iter().position(|b| *b == 0).unwrap_or(length);
        String::from_utf8(buffer[..end].to_vec())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

#[cfg(test)]
mod tests {
    use crate::StreamReader;

    #[test]
    fn we_can_read_little_endian_values() {
        let bytes = [0x78, 0x56, 0x34, 0x12, 1, 0, 0, 0, 0, 0, 0, 0];
        let mut reader = StreamReader::new(&bytes[..]);

        assert_eq!(reader.read_u32().unwrap(), 0x12345678);
        assert_eq!(reader.read_u64().unwrap(), 1);
        assert!(reader.read_u32().is_err());
    }

    #[test]
    fn fixed_strings_stop_at_the_terminator() {
        let mut bytes = b"libgles.so".to_vec();
        bytes.resize(16, 0);
        let mut reader = StreamReader::new(&bytes[..]);

        assert_eq!(reader.read_fixed_string(16).unwrap(), "libgles.so");
    }
}
