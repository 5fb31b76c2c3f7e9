//! File-based backend for persistent storage.

use crate::backend::ConfigBackend;
use crate::error::{StorageError, StorageResult};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Magic bytes at the start of an image file.
const IMAGE_MAGIC: [u8; 4] = *b"CFGF";

/// Current image format version.
const IMAGE_VERSION: u8 = 1;

/// Header size: magic + version + record count.
const HEADER_SIZE: usize = 4 + 1 + 4;

/// Trailer size: CRC32 of everything before it.
const TRAILER_SIZE: usize = 4;

/// A file-based backend.
///
/// All records are kept in one image file:
///
/// ```text
/// [magic "CFGF":4][version:1][count:4]
/// ([key_len:2][key][value_len:4][value])*
/// [crc32:4]
/// ```
///
/// All integers are little-endian. Writes and erases are staged in memory;
/// `commit` serializes the staged map to a sibling temporary file, syncs it
/// and renames it over the image, so a crash leaves either the old or the
/// new image intact.
///
/// # Example
///
/// ```no_run
/// use confstore_storage::{ConfigBackend, FileBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::new(Path::new("settings.img"));
/// backend.init().unwrap();
/// backend.write("default/app.port", &[0x28, 0x23]).unwrap();
/// backend.commit().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    staged: BTreeMap<String, Vec<u8>>,
    open: bool,
}

impl FileBackend {
    /// Creates a backend for the image at `path`. Nothing is touched until
    /// [`ConfigBackend::init`].
    #[must_use]
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            staged: BTreeMap::new(),
            open: false,
        }
    }

    /// Returns the path to the image file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(StorageError::Closed)
        }
    }

    fn encode_image(&self) -> StorageResult<Vec<u8>> {
        let count = u32::try_from(self.staged.len())
            .map_err(|_| StorageError::corrupted("too many records for image"))?;

        let mut buf = Vec::with_capacity(HEADER_SIZE + TRAILER_SIZE);
        buf.extend_from_slice(&IMAGE_MAGIC);
        buf.push(IMAGE_VERSION);
        buf.extend_from_slice(&count.to_le_bytes());

        for (key, value) in &self.staged {
            let key_len = u16::try_from(key.len())
                .map_err(|_| StorageError::corrupted(format!("record key too long: {key}")))?;
            let value_len = u32::try_from(value.len())
                .map_err(|_| StorageError::corrupted(format!("record too large: {key}")))?;
            buf.extend_from_slice(&key_len.to_le_bytes());
            buf.extend_from_slice(key.as_bytes());
            buf.extend_from_slice(&value_len.to_le_bytes());
            buf.extend_from_slice(value);
        }

        let crc = compute_crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    fn decode_image(bytes: &[u8]) -> StorageResult<BTreeMap<String, Vec<u8>>> {
        if bytes.len() < HEADER_SIZE + TRAILER_SIZE {
            return Err(StorageError::corrupted(format!(
                "image too short: {} bytes",
                bytes.len()
            )));
        }

        let (body, trailer) = bytes.split_at(bytes.len() - TRAILER_SIZE);
        let stored_crc = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let actual_crc = compute_crc32(body);
        if stored_crc != actual_crc {
            return Err(StorageError::corrupted(format!(
                "checksum mismatch: expected {stored_crc:08x}, got {actual_crc:08x}"
            )));
        }

        if body[..4] != IMAGE_MAGIC {
            return Err(StorageError::corrupted("bad image magic"));
        }
        if body[4] != IMAGE_VERSION {
            return Err(StorageError::corrupted(format!(
                "unsupported image version {}",
                body[4]
            )));
        }
        let count = u32::from_le_bytes([body[5], body[6], body[7], body[8]]);

        let mut reader = ImageReader {
            data: body,
            pos: HEADER_SIZE,
        };
        let mut records = BTreeMap::new();
        for _ in 0..count {
            let key_len = usize::from(reader.read_u16()?);
            let key = std::str::from_utf8(reader.take(key_len)?)
                .map_err(|_| StorageError::corrupted("record key is not UTF-8"))?
                .to_string();
            let value_len = reader.read_u32()? as usize;
            let value = reader.take(value_len)?.to_vec();
            records.insert(key, value);
        }

        if reader.pos != body.len() {
            return Err(StorageError::corrupted(format!(
                "trailing bytes in image: expected {} bytes, got {}",
                reader.pos,
                body.len()
            )));
        }

        Ok(records)
    }
}

impl ConfigBackend for FileBackend {
    fn init(&mut self) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        self.staged = match fs::read(&self.path) {
            Ok(bytes) => Self::decode_image(&bytes)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        self.open = true;
        Ok(())
    }

    fn deinit(&mut self) -> StorageResult<()> {
        self.staged.clear();
        self.open = false;
        Ok(())
    }

    fn read(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.ensure_open()?;
        self.staged
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::not_found(key))
    }

    fn write(&mut self, key: &str, data: &[u8]) -> StorageResult<()> {
        self.ensure_open()?;
        self.staged.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn erase(&mut self, key: &str) -> StorageResult<()> {
        self.ensure_open()?;
        self.staged.remove(key);
        Ok(())
    }

    fn erase_all(&mut self) -> StorageResult<()> {
        self.ensure_open()?;
        self.staged.clear();
        Ok(())
    }

    fn commit(&mut self) -> StorageResult<()> {
        self.ensure_open()?;
        let image = self.encode_image()?;
        let temp = self.temp_path();

        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp)?;
            file.write_all(&image)?;
            file.sync_all()?;
        }
        fs::rename(&temp, &self.path)?;

        // Persist the rename itself where the platform allows it
        if let Some(parent) = self.path.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        self.ensure_open()?;
        Ok(self.staged.keys().cloned().collect())
    }
}

/// Cursor over the body of an image file.
struct ImageReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ImageReader<'a> {
    fn take(&mut self, len: usize) -> StorageResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| StorageError::corrupted("truncated record"))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u16(&mut self) -> StorageResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> StorageResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// Computes the CRC32 (IEEE) checksum of `data`.
fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
