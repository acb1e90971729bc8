//! Reader and writer for the packed `poses_bounds.npy` archive.
//!
//! Each row holds a row-major 3x5 camera block (rotation, translation and the
//! height/width/focal column) followed by the near and far bounds. Only the
//! subset of the `.npy` format produced by LLFF tooling is accepted:
//! little-endian `f4`/`f8`, two dimensions, 17 columns.

use crate::error::{DataError, DataResult};
use crate::types::Bounds;
use std::path::Path;
use tracing::debug;

const MAGIC: &[u8] = b"\x93NUMPY";

/// Number of values per camera in the archive.
pub const ARCHIVE_COLUMNS: usize = 17;

/// Number of pose values (3x5 block) per camera.
pub const POSE_VALUES: usize = 15;

/// One camera entry of the archive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArchiveRow {
    /// Row-major 3x5 block: `[R | t | hwf]`.
    pub pose: [f32; POSE_VALUES],
    pub bounds: Bounds,
}

impl ArchiveRow {
    /// Entry `(row, col)` of the 3x5 block.
    pub fn at(&self, row: usize, col: usize) -> f32 {
        self.pose[row * 5 + col]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElementType {
    F32,
    F64,
}

impl ElementType {
    fn size(self) -> usize {
        match self {
            ElementType::F32 => 4,
            ElementType::F64 => 8,
        }
    }
}

#[derive(Debug)]
struct NpyHeader {
    element: ElementType,
    fortran_order: bool,
    shape: Vec<usize>,
}

/// Read and decode a pose archive from disk.
#[tracing::instrument(skip_all, fields(path = %path.display()))]
pub fn read_pose_archive(path: &Path) -> DataResult<Vec<ArchiveRow>> {
    let bytes = std::fs::read(path)?;
    let rows = parse_pose_archive(&bytes)?;
    debug!("Read {} camera rows", rows.len());
    Ok(rows)
}

/// Decode a pose archive from its raw `.npy` bytes.
pub fn parse_pose_archive(bytes: &[u8]) -> DataResult<Vec<ArchiveRow>> {
    if bytes.len() < 10 || &bytes[..MAGIC.len()] != MAGIC {
        return Err(DataError::Archive("missing .npy magic string".into()));
    }

    let major = bytes[6];
    let (header_len, offset) = match major {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err(DataError::Archive("truncated header".into()));
            }
            let len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
            (len as usize, 12)
        }
        v => {
            return Err(DataError::Archive(format!(
                "unsupported .npy version {v}"
            )));
        }
    };

    let data_start = offset + header_len;
    if bytes.len() < data_start {
        return Err(DataError::Archive("truncated header".into()));
    }
    let header = std::str::from_utf8(&bytes[offset..data_start])
        .map_err(|e| DataError::Archive(format!("header is not valid text: {e}")))?;
    let header = parse_header(header)?;

    let &[rows, cols] = header.shape.as_slice() else {
        return Err(DataError::Archive(format!(
            "expected a 2-D array, got shape {:?}",
            header.shape
        )));
    };
    if cols != ARCHIVE_COLUMNS {
        return Err(DataError::Archive(format!(
            "expected {ARCHIVE_COLUMNS} columns, got {cols}"
        )));
    }

    let size = header.element.size();
    let expected = rows
        .checked_mul(cols)
        .and_then(|n| n.checked_mul(size))
        .ok_or_else(|| DataError::Archive(format!("shape ({rows}, {cols}) is too large")))?;
    let data = &bytes[data_start..];
    if data.len() < expected {
        return Err(DataError::Archive(format!(
            "expected {expected} data bytes, found {}",
            data.len()
        )));
    }

    let value = |r: usize, c: usize| -> f32 {
        let index = if header.fortran_order {
            c * rows + r
        } else {
            r * cols + c
        };
        let raw = &data[index * size..(index + 1) * size];
        match header.element {
            ElementType::F32 => f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
            ElementType::F64 => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(raw);
                f64::from_le_bytes(buf) as f32
            }
        }
    };

    Ok((0..rows)
        .map(|r| ArchiveRow {
            pose: std::array::from_fn(|c| value(r, c)),
            bounds: Bounds::new(value(r, POSE_VALUES), value(r, POSE_VALUES + 1)),
        })
        .collect())
}

/// Encode rows as a version 1.0 `.npy` file of little-endian `f8`.
pub fn encode_pose_archive(rows: &[ArchiveRow]) -> Vec<u8> {
    let mut header = format!(
        "{{'descr': '<f8', 'fortran_order': False, 'shape': ({}, {ARCHIVE_COLUMNS}), }}",
        rows.len()
    );
    // magic + version + length prefix + header + newline is a multiple of 64
    let unpadded = MAGIC.len() + 4 + header.len() + 1;
    header.push_str(&" ".repeat((64 - unpadded % 64) % 64));
    header.push('\n');

    let mut bytes = Vec::with_capacity(MAGIC.len() + 4 + header.len() + rows.len() * 17 * 8);
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&[1, 0]);
    bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
    bytes.extend_from_slice(header.as_bytes());
    for row in rows {
        for v in row.pose {
            bytes.extend_from_slice(&(v as f64).to_le_bytes());
        }
        bytes.extend_from_slice(&(row.bounds.near as f64).to_le_bytes());
        bytes.extend_from_slice(&(row.bounds.far as f64).to_le_bytes());
    }
    bytes
}

fn parse_header(header: &str) -> DataResult<NpyHeader> {
    let descr = header_value(header, "descr")?.trim_matches(|c| c == '\'' || c == '"');
    let element = match descr {
        "<f8" => ElementType::F64,
        "<f4" => ElementType::F32,
        other => {
            return Err(DataError::Archive(format!(
                "unsupported element type {other}"
            )));
        }
    };

    let fortran_order = match header_value(header, "fortran_order")? {
        "True" => true,
        "False" => false,
        other => {
            return Err(DataError::Archive(format!(
                "invalid fortran_order value {other}"
            )));
        }
    };

    let shape = header_value(header, "shape")?
        .trim_start_matches('(')
        .trim_end_matches(')')
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<usize>()
                .map_err(|e| DataError::Archive(format!("invalid shape entry {s}: {e}")))
        })
        .collect::<DataResult<Vec<_>>>()?;

    Ok(NpyHeader {
        element,
        fortran_order,
        shape,
    })
}

/// Raw text of `key`'s value in the header dictionary.
fn header_value<'a>(header: &'a str, key: &str) -> DataResult<&'a str> {
    let missing = || DataError::Archive(format!("header has no '{key}' entry"));
    let start = header
        .find(&format!("'{key}'"))
        .or_else(|| header.find(&format!("\"{key}\"")))
        .ok_or_else(missing)?;
    let rest = &header[start + key.len() + 2..];
    let rest = rest.trim_start().strip_prefix(':').ok_or_else(missing)?.trim_start();

    let end = if rest.starts_with('(') {
        rest.find(')').map(|i| i + 1)
    } else {
        rest.find([',', '}'])
    }
    .ok_or_else(missing)?;
    Ok(rest[..end].trim())
}
