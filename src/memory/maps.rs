use super::AddressRange;
use byteorder::ReadBytesExt;
use smallvec::SmallVec;
use std::fs::File;
use std::io::{self, BufReader, ErrorKind, Read};

const MAX_MAPS_LEN: usize = 256;
const READ_BUFFER_SIZE: usize = 32;

/// Find the readable mapping of the calling thread's address space that
/// contains `target`.
///
/// Intended for computing [StackBounds] ahead of a capture; it opens and
/// parses `/proc`, which is not something to do from a signal handler.
///
/// [StackBounds]: crate::StackBounds
pub fn region_containing(target: u64) -> io::Result<Option<AddressRange>> {
    let maps = MapsReader::open()?.read_maps()?;
    Ok(maps.into_iter().find(|m| m.contains(target)))
}

struct MapsReader<R> {
    reader: R,
    buffer: [u8; READ_BUFFER_SIZE],
}

impl MapsReader<BufReader<File>> {
    fn open() -> io::Result<Self> {
        let path = format!("/proc/{}/task/{}/maps", unsafe { libc::getpid() }, unsafe { libc::gettid() });
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: Read> MapsReader<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: [0u8; READ_BUFFER_SIZE],
        }
    }

    fn read_maps(&mut self) -> io::Result<SmallVec<[AddressRange; MAX_MAPS_LEN]>> {
        let mut v = SmallVec::new();
        loop {
            // There may be nothing to read here, UnexpectedEof is considered
            // to have completed the parsing normally.
            let len = match self.read_into_buffer_until(b'-') {
                Ok(len) => len,
                Err(err) if err.kind() == ErrorKind::UnexpectedEof => break,
                Err(err) => return Err(err),
            };
            let start = self.parse_hex(len)?;
            let len = self.read_into_buffer_until(b' ')?;
            let end = self.parse_hex(len)?;
            let mut readable = false;
            self.read_then_callback_until(b' ', |c| {
                if c == b'r' {
                    readable = true;
                }
            })?;
            if readable {
                v.push(AddressRange { start, end });
            }
            // The last line may not have b'\n', and UnexpectedEof is
            // considered to be parsed normally.
            match self.skip_until(b'\n') {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::UnexpectedEof => break,
                Err(err) => return Err(err),
            }
        }
        Ok(v)
    }

    fn read_into_buffer_until(&mut self, target: u8) -> io::Result<usize> {
        let mut index = 0;
        loop {
            let c = self.reader.read_u8()?;
            if c == target {
                return Ok(index);
            }
            if index == READ_BUFFER_SIZE {
                return Err(io::Error::new(ErrorKind::InvalidData, "maps field too long"));
            }
            self.buffer[index] = c;
            index += 1;
        }
    }

    fn read_then_callback_until(&mut self, target: u8, mut f: impl FnMut(u8)) -> io::Result<()> {
        loop {
            let c = self.reader.read_u8()?;
            if c == target {
                break;
            }
            f(c);
        }
        Ok(())
    }

    fn skip_until(&mut self, target: u8) -> io::Result<()> {
        while self.reader.read_u8()? != target {}
        Ok(())
    }

    fn parse_hex(&self, len: usize) -> io::Result<u64> {
        std::str::from_utf8(&self.buffer[..len])
            .ok()
            .and_then(|s| u64::from_str_radix(s, 16).ok())
            .ok_or_else(|| io::Error::new(ErrorKind::InvalidData, "malformed maps address"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
55d0c6a00000-55d0c6a02000 r--p 00000000 08:01 1234 /usr/bin/cat
55d0c6a02000-55d0c6a07000 r-xp 00002000 08:01 1234 /usr/bin/cat
7ffd1c4e0000-7ffd1c501000 rw-p 00000000 00:00 0 [stack]
ffffffffff600000-ffffffffff601000 --xp 00000000 00:00 0 [vsyscall]";

    #[test]
    fn test_parse_sample() -> io::Result<()> {
        let maps = MapsReader::new(SAMPLE.as_bytes()).read_maps()?;
        assert_eq!(maps.len(), 3);
        assert_eq!(maps[0], AddressRange { start: 0x55d0c6a00000, end: 0x55d0c6a02000 });
        assert_eq!(maps[2], AddressRange { start: 0x7ffd1c4e0000, end: 0x7ffd1c501000 });
        Ok(())
    }

    #[test]
    fn test_malformed_address() {
        let err = MapsReader::new("zz-10 r--p\n".as_bytes()).read_maps().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn test_read_maps() -> io::Result<()> {
        let maps = MapsReader::open()?.read_maps()?;
        assert!(maps.len() > 0);
        Ok(())
    }

    #[test]
    fn test_region_containing() -> io::Result<()> {
        let v = 0;
        let address = &v as *const i32 as u64;
        let region = region_containing(address)?.expect("stack is mapped");
        assert!(region.contains(address));
        assert_eq!(region_containing(0)?, None);
        Ok(())
    }
}
