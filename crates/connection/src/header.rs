use std::io;
use std::io::{Read, Write};

use bitflags::bitflags;
use log::debug;
use thiserror::Error;

use crate::StreamReader;

pub const MAGIC: [u8; 4] = *b"spy0";
pub const CURRENT_VERSION: u32 = 4;

const MIN_VERSION: u32 = 1;
const INTERCEPTOR_PATH_LENGTH: usize = 512;

bitflags! {
    /// Capture options carried in the header's flag bitmask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Flags: u32 {
        const DISABLE_PRECOMPILED_SHADERS = 0x0000_0001;
        const DEFER_START = 0x0000_0010;
        const NO_BUFFER = 0x0000_0020;
        const HIDE_UNKNOWN_EXTENSIONS = 0x0000_0040;
        const STORE_TIMESTAMPS = 0x0000_0080;
        const DISABLE_COHERENT_MEMORY_TRACKER = 0x0000_0100;
        const WAIT_FOR_DEBUGGER = 0x0000_0200;
        const IGNORE_FRAME_BOUNDARY_DELIMITERS = 0x0000_0400;
        const RECORD_ERROR_STATE = 0x1000_0000;
    }
}

bitflags! {
    /// Graphics APIs the capture tool asked to trace.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ApiMask: u32 {
        const GLES = 1 << 0;
        const VULKAN = 1 << 1;
    }
}

#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("could not read the connection header: {0}")]
    Io(#[from] io::Error),
    #[error("bad connection header magic {0:?}")]
    BadMagic([u8; 4]),
    #[error("unsupported connection header version {0}")]
    UnsupportedVersion(u32),
}

/// Handshake sent by the capture tool when the spy connects.
///
/// Layout by version, all integers little-endian:
/// * 1: magic, version, frame frequency, start frame, frame count, apis, flags
/// * 2: as 1 with the draw frequency after the frame frequency, then a `u64` GVR handle
/// * 3: as 2 followed by a 512 byte zero-terminated interceptor path
/// * 4: as 2 without the GVR handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHeader {
    pub version: u32,
    pub observe_frame_frequency: u32,
    pub observe_draw_frequency: u32,
    pub start_frame: u32,
    pub num_frames: u32,
    pub apis: ApiMask,
    pub flags: Flags,
    pub gvr_handle: u64,
    pub interceptor_path: String,
}

impl Default for ConnectionHeader {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            observe_frame_frequency: 0,
            observe_draw_frequency: 0,
            start_frame: 0,
            num_frames: 0,
            apis: ApiMask::all(),
            flags: Flags::empty(),
            gvr_handle: 0,
            interceptor_path: String::new(),
        }
    }
}

impl ConnectionHeader {
    pub fn read<R: Read>(reader: &mut StreamReader<R>) -> Result<Self, HeaderError> {
        let magic = reader.read_bytes::<4>()?;
        if magic != MAGIC {
            return Err(HeaderError::BadMagic(magic));
        }

        let version = reader.read_u32()?;
        if !(MIN_VERSION..=CURRENT_VERSION).contains(&version) {
            return Err(HeaderError::UnsupportedVersion(version));
        }

        let observe_frame_frequency = reader.read_u32()?;
        let observe_draw_frequency = if version >= 2 { reader.read_u32()? } else { 0 };
        let start_frame = reader.read_u32()?;
        let num_frames = reader.read_u32()?;
        let apis = ApiMask::from_bits_truncate(reader.read_u32()?);
        let flags = Flags::from_bits_retain(reader.read_u32()?);

        let gvr_handle = if version == 2 || version == 3 { reader.read_u64()? } else { 0 };
        let interceptor_path = if version == 3 {
            reader.read_fixed_string(INTERCEPTOR_PATH_LENGTH)?
        } else {
            String::new()
        };

        let header = Self {
            version,
            observe_frame_frequency,
            observe_draw_frequency,
            start_frame,
            num_frames,
            apis,
            flags,
            gvr_handle,
            interceptor_path,
        };

        debug!("Read connection header {:?}", header);
        Ok(header)
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&MAGIC)?;
        writer.write_all(&self.version.to_le_bytes())?;
        writer.write_all(&self.observe_frame_frequency.to_le_bytes())?;
        if self.version >= 2 {
            writer.write_all(&self.observe_draw_frequency.to_le_bytes())?;
        }
        writer.write_all(&self.start_frame.to_le_bytes())?;
        writer.write_all(&self.num_frames.to_le_bytes())?;
        writer.write_all(&self.apis.bits().to_le_bytes())?;
        writer.write_all(&self.flags.bits().to_le_bytes())?;

        if self.version == 2 || self.version == 3 {
            writer.write_all(&self.gvr_handle.to_le_bytes())?;
        }
        if self.version == 3 {
            let mut path = self.interceptor_path.as_bytes().to_vec();
            path.resize(INTERCEPTOR_PATH_LENGTH, 0);
            path[INTERCEPTOR_PATH_LENGTH - 1] = 0;
            writer.write_all(&path)?;
        }

        Ok(())
    }

    pub fn is_deferred(&self) -> bool {
        self.flags.contains(Flags::DEFER_START)
    }
}

#[cfg(test)]
mod tests {
    use crate::{ConnectionHeader, HeaderError, StreamReader, ApiMask, Flags};

    fn read_back(header: &ConnectionHeader) -> ConnectionHeader {
        let mut bytes = Vec::new();
        header.write(&mut bytes).unwrap();
        ConnectionHeader::read(&mut StreamReader::new(&bytes[..])).unwrap()
    }

    #[test]
    fn we_can_read_a_current_header() {
        let header = ConnectionHeader {
            observe_frame_frequency: 2,
            observe_draw_frequency: 5,
            start_frame: 3,
            num_frames: 10,
            apis: ApiMask::GLES,
            flags: Flags::DEFER_START | Flags::RECORD_ERROR_STATE,
            ..Default::default()
        };

        assert_eq!(read_back(&header), header);
    }

    #[test]
    fn version_one_has_no_draw_frequency() {
        let bytes: Vec<u8> = [
            &b"spy0"[..],
            &1u32.to_le_bytes(),
            &4u32.to_le_bytes(),
            &2u32.to_le_bytes(),
            &9u32.to_le_bytes(),
            &2u32.to_le_bytes(),
            &0x10u32.to_le_bytes(),
        ].concat();

        let header = ConnectionHeader::read(&mut StreamReader::new(&bytes[..])).unwrap();

        assert_eq!(header.observe_frame_frequency, 4);
        assert_eq!(header.observe_draw_frequency, 0);
        assert_eq!(header.start_frame, 2);
        assert_eq!(header.num_frames, 9);
        assert_eq!(header.apis, ApiMask::VULKAN);
        assert!(header.is_deferred());
    }

    #[test]
    fn version_three_carries_the_interceptor_path() {
        let header = ConnectionHeader {
            version: 3,
            gvr_handle: 0xabcdef,
            interceptor_path: "/data/local/tmp/libinterceptor.so".to_string(),
            ..Default::default()
        };

        assert_eq!(read_back(&header), header);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let bytes = b"gapi\x04\x00\x00\x00";
        let result = ConnectionHeader::read(&mut StreamReader::new(&bytes[..]));

        assert!(matches!(result, Err(HeaderError::BadMagic(_))));
    }

    #[test]
    fn future_versions_are_rejected() {
        let bytes: Vec<u8> = [&b"spy0"[..], &99u32.to_le_bytes()].concat();
        let result = ConnectionHeader::read(&mut StreamReader::new(&bytes[..]));

        assert!(matches!(result, Err(HeaderError::UnsupportedVersion(99))));
    }

    #[test]
    fn short_headers_are_io_errors() {
        let bytes: Vec<u8> = [&b"spy0"[..], &4u32.to_le_bytes(), &1u32.to_le_bytes()].concat();
        let result = ConnectionHeader::read(&mut StreamReader::new(&bytes[..]));

        assert!(matches!(result, Err(HeaderError::Io(_))));
    }
}
