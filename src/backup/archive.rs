//! ZIP container and checksum helpers
//!
//! Export stages an archive as a directory tree and packages it in one
//! pass; import reads members in place for validation and extracts them
//! only through sanitized names.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;
use walkdir::WalkDir;
use zip::result::ZipError;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{VaultError, VaultResult};

const MAX_ARCHIVE_MEMBERS: usize = 100_000;
const MAX_UNCOMPRESSED_BYTES: u64 = 20 * 1024 * 1024 * 1024;
const MAX_COMPRESSION_RATIO: f64 = 200.0;

/// Whether an archive member name could escape the extraction directory
///
/// Backslashes count as separators. Any `..`, doubled separator or leading
/// separator is rejected.
pub fn is_unsafe_member(name: &str) -> bool {
    let normalized = name.replace('\\', "/");
    normalized.contains("..") || normalized.contains("//") || normalized.starts_with('/')
}

/// Hex SHA-256 of a file, read in fixed-size chunks
pub fn sha256_file(path: &Path) -> VaultResult<String> {
    let file = File::open(path)
        .map_err(|e| VaultError::Io(format!("Failed to open {}: {}", path.display(), e)))?;
    sha256_reader(BufReader::new(file))
}

/// Hex SHA-256 of everything a reader yields
pub fn sha256_reader<R: Read>(mut reader: R) -> VaultResult<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Writer that hashes and counts everything passing through it
pub struct HashingWriter<W: Write> {
    inner: W,
    hasher: Sha256,
    bytes: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes: 0,
        }
    }

    /// Flush and return the inner writer, hex digest and byte count
    pub fn finish(mut self) -> VaultResult<(W, String, u64)> {
        self.inner.flush()?;
        Ok((self.inner, hex::encode(self.hasher.finalize()), self.bytes))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        self.bytes += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Package every file under `source_dir` into a new ZIP at `zip_path`
///
/// Member names are the paths relative to `source_dir` with `/`
/// separators. Returns the number of members written.
pub fn package_dir(source_dir: &Path, zip_path: &Path, compression_level: u32) -> VaultResult<usize> {
    let zip_file = File::create(zip_path).map_err(|e| {
        VaultError::Archive(format!("Failed to create {}: {}", zip_path.display(), e))
    })?;
    let mut zip_writer = ZipWriter::new(zip_file);

    let compression_method = if compression_level == 0 {
        CompressionMethod::Stored
    } else {
        CompressionMethod::Deflated
    };
    let mut file_options = FileOptions::default()
        .compression_method(compression_method)
        .large_file(true);
    if compression_level > 0 {
        file_options = file_options.compression_level(Some(compression_level as i32));
    }

    let mut members = 0;
    for entry in WalkDir::new(source_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| VaultError::Archive(format!("Failed to walk staging dir: {}", e)))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(source_dir)
            .map_err(|_| VaultError::Archive("Staged file outside staging dir".into()))?;
        let name = relative.to_string_lossy().replace('\\', "/");

        debug!(member = %name, "adding archive member");
        zip_writer.start_file(name, file_options)?;
        let mut file = File::open(entry.path())?;
        io::copy(&mut file, &mut zip_writer)?;
        members += 1;
    }

    zip_writer.finish()?;
    Ok(members)
}

/// Read-only view of an archive on disk
pub struct ArchiveReader {
    archive: ZipArchive<File>,
}

impl ArchiveReader {
    /// Open an archive, rejecting member counts or sizes that look like a
    /// decompression bomb
    pub fn open(path: &Path) -> VaultResult<Self> {
        let file = File::open(path)
            .map_err(|e| VaultError::Archive(format!("Failed to open {}: {}", path.display(), e)))?;
        let archive = ZipArchive::new(file)
            .map_err(|e| VaultError::Archive(format!("Not a readable ZIP archive: {}", e)))?;
        let mut reader = Self { archive };
        reader.check_limits()?;
        Ok(reader)
    }

    fn check_limits(&mut self) -> VaultResult<()> {
        if self.archive.len() > MAX_ARCHIVE_MEMBERS {
            return Err(VaultError::Archive(format!(
                "Archive has too many members: {} > {}",
                self.archive.len(),
                MAX_ARCHIVE_MEMBERS
            )));
        }

        let mut total_uncompressed: u64 = 0;
        for i in 0..self.archive.len() {
            let file = self.archive.by_index_raw(i)?;
            total_uncompressed = total_uncompressed.saturating_add(file.size());
            if total_uncompressed > MAX_UNCOMPRESSED_BYTES {
                return Err(VaultError::Archive(format!(
                    "Archive expands to more than {} bytes",
                    MAX_UNCOMPRESSED_BYTES
                )));
            }
            if file.compressed_size() > 0 {
                let ratio = file.size() as f64 / file.compressed_size() as f64;
                if ratio > MAX_COMPRESSION_RATIO {
                    return Err(VaultError::Archive(format!(
                        "Suspicious compression ratio {:.1} for {}",
                        ratio,
                        file.name()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Raw member names as stored in the archive
    pub fn member_names(&self) -> Vec<String> {
        self.archive.file_names().map(str::to_string).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.archive.file_names().any(|n| n == name)
    }

    /// Read a member as UTF-8 text; `None` if absent
    pub fn read_string(&mut self, name: &str) -> VaultResult<Option<String>> {
        let mut member = match self.archive.by_name(name) {
            Ok(member) => member,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut contents = String::new();
        member.read_to_string(&mut contents)?;
        Ok(Some(contents))
    }

    /// Hex SHA-256 of a member's contents; `None` if absent
    pub fn member_sha256(&mut self, name: &str) -> VaultResult<Option<String>> {
        match self.archive.by_name(name) {
            Ok(member) => sha256_reader(member).map(Some),
            Err(ZipError::FileNotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Extract every member below `target_dir`
    ///
    /// Member names are re-checked here; an unsafe name aborts extraction.
    pub fn extract_to(&mut self, target_dir: &Path) -> VaultResult<usize> {
        fs::create_dir_all(target_dir)?;
        let mut extracted = 0;
        for i in 0..self.archive.len() {
            let mut member = self.archive.by_index(i)?;
            if is_unsafe_member(member.name()) {
                return Err(VaultError::Validation(vec![format!(
                    "Unsafe path in archive: {}",
                    member.name()
                )]));
            }
            let relative: PathBuf = member.enclosed_name().map(Path::to_path_buf).ok_or_else(|| {
                VaultError::Validation(vec![format!("Unsafe path in archive: {}", member.name())])
            })?;
            let out_path = target_dir.join(relative);

            if member.is_dir() {
                fs::create_dir_all(&out_path)?;
                continue;
            }
            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out_file = File::create(&out_path)?;
            io::copy(&mut member, &mut out_file)?;
            extracted += 1;
        }
        Ok(extracted)
    }
}
