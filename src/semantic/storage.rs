//! On-disk embedding cache, one file per catalog fingerprint.
//!
//! File format: `<hex fingerprint>.bin`
//!
//! Header (53 bytes):
//! - version: u8 (1)
//! - fingerprint: [u8; 32] (SHA256 of model id + catalog rows)
//! - dimensions: u32 (little-endian)
//! - rows: u64 (little-endian)
//! - header_checksum: u32 (CRC32 of header fields before it)
//! - payload_checksum: u32 (CRC32 of the payload bytes)
//!
//! Payload:
//! - rows * dimensions f32 values (little-endian, row-major)

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use crate::catalog::Fingerprint;
use crate::semantic::cache::{CacheError, EmbeddingCache};
use crate::semantic::matrix::EmbeddingMatrix;

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// version(1) + fingerprint(32) + dimensions(4) + rows(8) + header crc(4) + payload crc(4)
const HEADER_SIZE: usize = 53;

/// Bytes covered by the header checksum.
const CHECKED_HEADER: usize = 45;

/// Filesystem-backed [`EmbeddingCache`].
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.dir.join(format!("{}.bin", fingerprint.to_hex()))
    }

    /// Write a matrix to `path` and fsync it.
    fn write_to_file(
        &self,
        path: &Path,
        fingerprint: &Fingerprint,
        matrix: &EmbeddingMatrix,
    ) -> Result<(), CacheError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        let payload: Vec<u8> = matrix
            .as_slice()
            .iter()
            .flat_map(|value| value.to_le_bytes())
            .collect();

        let header = Header {
            version: FORMAT_VERSION,
            fingerprint: *fingerprint.as_bytes(),
            dimensions: matrix.dimensions() as u32,
            rows: matrix.rows() as u64,
            payload_checksum: crc32fast::hash(&payload),
        };
        writer.write_all(&header.to_bytes())?;
        writer.write_all(&payload)?;

        writer.flush()?;
        let file = writer
            .into_inner()
            .map_err(std::io::Error::other)?;
        file.sync_all()?;

        Ok(())
    }

    fn read_from_file(
        &self,
        path: &Path,
        fingerprint: &Fingerprint,
    ) -> Result<EmbeddingMatrix, CacheError> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        let mut header_bytes = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header_bytes)?;
        let header = Header::from_bytes(&header_bytes)?;

        if header.fingerprint != *fingerprint.as_bytes() {
            return Err(CacheError::FingerprintMismatch);
        }

        let len = (header.rows as usize)
            .checked_mul(header.dimensions as usize)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| CacheError::InvalidFormat("matrix size overflows".to_string()))?;

        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload)?;

        if crc32fast::hash(&payload) != header.payload_checksum {
            return Err(CacheError::ChecksumMismatch);
        }

        let mut trailing = [0u8; 1];
        if reader.read(&mut trailing)? != 0 {
            return Err(CacheError::InvalidFormat(
                "trailing bytes after payload".to_string(),
            ));
        }

        let data = payload
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        EmbeddingMatrix::from_raw(header.dimensions as usize, data)
            .map_err(|e| CacheError::InvalidFormat(e.to_string()))
    }
}

impl EmbeddingCache for FileCache {
    fn get(&self, fingerprint: &Fingerprint) -> Result<Option<EmbeddingMatrix>, CacheError> {
        let path = self.path_for(fingerprint);
        match self.read_from_file(&path, fingerprint) {
            Ok(matrix) => Ok(Some(matrix)),
            Err(CacheError::Io(err)) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Uses atomic write: temp file -> fsync -> rename
    fn put(&self, fingerprint: &Fingerprint, matrix: &EmbeddingMatrix) -> Result<(), CacheError> {
        std::fs::create_dir_all(&self.dir)?;

        let path = self.path_for(fingerprint);
        let temp_path = path.with_extension("tmp");

        if let Err(err) = self.write_to_file(&temp_path, fingerprint, matrix) {
            // Clean up temp file on error
            let _ = std::fs::remove_file(&temp_path);
            return Err(err);
        }

        std::fs::rename(&temp_path, &path)?;
        log::debug!("Cached {} embeddings at {}", matrix.rows(), path.display());

        Ok(())
    }

    fn evict(&self, fingerprint: &Fingerprint) -> Result<(), CacheError> {
        match std::fs::remove_file(self.path_for(fingerprint)) {
            Err(err) if err.kind() != ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }
}

#[derive(Debug)]
struct Header {
    version: u8,
    fingerprint: [u8; 32],
    dimensions: u32,
    rows: u64,
    payload_checksum: u32,
}

impl Header {
    fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];

        bytes[0] = self.version;
        bytes[1..33].copy_from_slice(&self.fingerprint);
        bytes[33..37].copy_from_slice(&self.dimensions.to_le_bytes());
        bytes[37..45].copy_from_slice(&self.rows.to_le_bytes());

        let checksum = crc32fast::hash(&bytes[..CHECKED_HEADER]);
        bytes[45..49].copy_from_slice(&checksum.to_le_bytes());
        bytes[49..53].copy_from_slice(&self.payload_checksum.to_le_bytes());

        bytes
    }

    fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Result<Self, CacheError> {
        let version = bytes[0];

        // Version check first
        if version != FORMAT_VERSION {
            return Err(CacheError::VersionMismatch(version, FORMAT_VERSION));
        }

        let stored_checksum = u32::from_le_bytes([bytes[45], bytes[46], bytes[47], bytes[48]]);
        if stored_checksum != crc32fast::hash(&bytes[..CHECKED_HEADER]) {
            return Err(CacheError::ChecksumMismatch);
        }

        let mut fingerprint = [0u8; 32];
        fingerprint.copy_from_slice(&bytes[1..33]);

        let dimensions = u32::from_le_bytes([bytes[33], bytes[34], bytes[35], bytes[36]]);
        let mut rows = [0u8; 8];
        rows.copy_from_slice(&bytes[37..45]);
        let payload_checksum = u32::from_le_bytes([bytes[49], bytes[50], bytes[51], bytes[52]]);

        if dimensions == 0 {
            return Err(CacheError::InvalidFormat("zero dimensions".to_string()));
        }

        Ok(Header {
            version,
            fingerprint,
            dimensions,
            rows: u64::from_le_bytes(rows),
            payload_checksum,
        })
    }
}
