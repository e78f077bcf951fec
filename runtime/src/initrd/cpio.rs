//! SVR4 "newc" CPIO codec.
//!
//! Every entry is a 110-byte ASCII header (`070701` followed by thirteen
//! 8-digit hex fields), the NUL-terminated name padded to a 4-byte
//! boundary, then the body padded the same way. The archive ends with an
//! entry named `TRAILER!!!`.

use std::io::{self, Read, Write};

/// newc magic.
pub const MAGIC: &[u8; 6] = b"070701";

/// Name of the terminating entry.
pub const TRAILER: &str = "TRAILER!!!";

const HEADER_LEN: usize = 110;

/// File type mask and types, as in `st_mode`.
pub const S_IFMT: u32 = 0o170_000;
pub const S_IFDIR: u32 = 0o040_000;
pub const S_IFREG: u32 = 0o100_000;
pub const S_IFLNK: u32 = 0o120_000;

/// Entry type, derived from the mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    Regular,
    Symlink,
    Other(u32),
}

/// One archive entry header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    /// Type and permission bits
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub mtime: u32,
    pub size: u64,
    /// Symlink target; empty for other kinds
    pub linkname: String,
}

impl Header {
    pub fn directory(name: impl Into<String>, perm: u32) -> Self {
        Self::with_mode(name, S_IFDIR | (perm & 0o7777), 0)
    }

    pub fn regular(name: impl Into<String>, perm: u32, size: u64) -> Self {
        Self::with_mode(name, S_IFREG | (perm & 0o7777), size)
    }

    pub fn symlink(name: impl Into<String>, target: impl Into<String>, perm: u32) -> Self {
        let target = target.into();
        let mut header = Self::with_mode(name, S_IFLNK | (perm & 0o7777), target.len() as u64);
        header.linkname = target;
        header
    }

    fn with_mode(name: impl Into<String>, mode: u32, size: u64) -> Self {
        Self {
            name: name.into(),
            mode,
            uid: 0,
            gid: 0,
            mtime: 0,
            size,
            linkname: String::new(),
        }
    }

    pub fn kind(&self) -> EntryKind {
        match self.mode & S_IFMT {
            S_IFDIR => EntryKind::Directory,
            S_IFREG => EntryKind::Regular,
            S_IFLNK => EntryKind::Symlink,
            other => EntryKind::Other(other),
        }
    }

    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }
}

fn pad4(len: u64) -> usize {
    ((4 - (len % 4)) % 4) as usize
}

fn invalid(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.into())
}

/// Streaming newc writer.
pub struct Writer<W: Write> {
    inner: W,
    written: u64,
    next_ino: u32,
}

impl<W: Write> Writer<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            written: 0,
            next_ino: 1,
        }
    }

    /// Append an entry whose body is read from `body`.
    ///
    /// Symlink bodies are the link target and are taken from the header;
    /// `body` is ignored for them. Exactly `header.size` bytes must be
    /// readable from `body` for regular files.
    pub fn append(&mut self, header: &Header, body: impl Read) -> io::Result<()> {
        let ino = self.next_ino;
        self.next_ino += 1;
        let nlink = if header.kind() == EntryKind::Directory { 2 } else { 1 };

        match header.kind() {
            EntryKind::Symlink => {
                if header.size != header.linkname.len() as u64 {
                    return Err(invalid(format!(
                        "symlink {} size {} does not match target length",
                        header.name, header.size
                    )));
                }
                self.write_header(header, ino, nlink)?;
                self.write_padded(header.linkname.as_bytes())?;
            }
            EntryKind::Directory => {
                let mut dir = header.clone();
                dir.size = 0;
                self.write_header(&dir, ino, nlink)?;
            }
            _ => {
                self.write_header(header, ino, nlink)?;
                let copied = io::copy(&mut body.take(header.size), &mut self.inner)?;
                if copied != header.size {
                    return Err(invalid(format!(
                        "{}: expected {} bytes, got {}",
                        header.name, header.size, copied
                    )));
                }
                self.written += copied;
                self.pad()?;
            }
        }
        Ok(())
    }

    /// Write the trailer and return the inner writer.
    pub fn finish(mut self) -> io::Result<W> {
        let trailer = Header {
            name: TRAILER.to_string(),
            mode: 0,
            uid: 0,
            gid: 0,
            mtime: 0,
            size: 0,
            linkname: String::new(),
        };
        self.write_header(&trailer, 0, 1)?;
        self.inner.flush()?;
        Ok(self.inner)
    }

    fn write_header(&mut self, header: &Header, ino: u32, nlink: u32) -> io::Result<()> {
        if header.name.as_bytes().contains(&0) {
            return Err(invalid(format!("entry name contains NUL: {:?}", header.name)));
        }
        let size = u32::try_from(header.size)
            .map_err(|_| invalid(format!("{} is too large for newc", header.name)))?;
        let namesize = header.name.len() + 1;

        let fields = [
            ino,
            header.mode,
            header.uid,
            header.gid,
            nlink,
            header.mtime,
            size,
            0, // devmajor
            0, // devminor
            0, // rdevmajor
            0, // rdevminor
            namesize as u32,
            0, // check
        ];
        let mut raw = Vec::with_capacity(HEADER_LEN + namesize + 3);
        raw.extend_from_slice(MAGIC);
        for field in fields {
            raw.extend_from_slice(format!("{:08X}", field).as_bytes());
        }
        raw.extend_from_slice(header.name.as_bytes());
        raw.push(0);

        self.write_padded(&raw)
    }

    fn write_padded(&mut self, data: &[u8]) -> io::Result<()> {
        self.inner.write_all(data)?;
        self.written += data.len() as u64;
        self.pad()
    }

    fn pad(&mut self) -> io::Result<()> {
        let padding = pad4(self.written);
        self.inner.write_all(&[0u8; 3][..padding])?;
        self.written += padding as u64;
        Ok(())
    }
}

/// Streaming newc reader.
pub struct Reader<R: Read> {
    inner: R,
    done: bool,
}

impl<R: Read> Reader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, done: false }
    }

    /// Read the next entry and its body. `None` after the trailer.
    pub fn next_entry(&mut self) -> io::Result<Option<(Header, Vec<u8>)>> {
        if self.done {
            return Ok(None);
        }

        let mut raw = [0u8; HEADER_LEN];
        self.inner.read_exact(&mut raw)?;
        if &raw[..6] != MAGIC {
            return Err(invalid("bad newc magic"));
        }

        let field = |i: usize| -> io::Result<u32> {
            let start = 6 + i * 8;
            let text = std::str::from_utf8(&raw[start..start + 8])
                .map_err(|_| invalid("non-ASCII header field"))?;
            u32::from_str_radix(text, 16).map_err(|_| invalid(format!("bad header field {:?}", text)))
        };
        let mode = field(1)?;
        let uid = field(2)?;
        let gid = field(3)?;
        let mtime = field(5)?;
        let size = field(6)? as u64;
        let namesize = field(11)? as usize;
        if namesize == 0 {
            return Err(invalid("empty entry name"));
        }

        let mut name = vec![0u8; namesize + pad4((HEADER_LEN + namesize) as u64)];
        self.inner.read_exact(&mut name)?;
        name.truncate(namesize - 1);
        let name = String::from_utf8(name).map_err(|_| invalid("entry name is not UTF-8"))?;

        if name == TRAILER {
            self.done = true;
            return Ok(None);
        }

        let mut body = vec![0u8; size as usize];
        self.inner.read_exact(&mut body)?;
        let mut padding = [0u8; 3];
        self.inner.read_exact(&mut padding[..pad4(size)])?;

        let linkname = if mode & S_IFMT == S_IFLNK {
            String::from_utf8(body.clone()).map_err(|_| invalid("symlink target is not UTF-8"))?
        } else {
            String::new()
        };

        Ok(Some((
            Header {
                name,
                mode,
                uid,
                gid,
                mtime,
                size,
                linkname,
            },
            body,
        )))
    }

    /// Read every remaining entry.
    pub fn entries(mut self) -> io::Result<Vec<(Header, Vec<u8>)>> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next_entry()? {
            entries.push(entry);
        }
        Ok(entries)
    }
}
