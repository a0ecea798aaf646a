//! Mount table inspection
//!
//! Parses `/proc/mounts` (fstab format, octal-escaped fields).

use crate::error::Result;
use std::path::{Path, PathBuf};

pub const PROC_MOUNTS: &str = "/proc/mounts";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub device: String,
    pub mount_point: String,
    pub fs_type: String,
    pub options: String,
}

/// Snapshot of the node's mount table
#[derive(Debug, Clone, Default)]
pub struct MountTable {
    entries: Vec<MountEntry>,
}

impl MountTable {
    /// Read and parse a mounts file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        Ok(Self::parse(&content))
    }

    pub fn parse(content: &str) -> Self {
        let entries = content
            .lines()
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                let device = fields.next()?;
                let mount_point = fields.next()?;
                let fs_type = fields.next()?;
                let options = fields.next().unwrap_or_default();
                Some(MountEntry {
                    device: unescape(device),
                    mount_point: unescape(mount_point),
                    fs_type: fs_type.to_string(),
                    options: options.to_string(),
                })
            })
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[MountEntry] {
        &self.entries
    }

    pub fn is_mount_point(&self, path: &str) -> bool {
        let path = clean(path);
        self.entries.iter().any(|e| clean(&e.mount_point) == path)
    }

    /// Device mounted at `path` (last mount wins when stacked)
    pub fn device_for(&self, path: &str) -> Option<&str> {
        let path = clean(path);
        self.entries
            .iter()
            .rev()
            .find(|e| clean(&e.mount_point) == path)
            .map(|e| e.device.as_str())
    }

    /// Number of mounts backed by `device`
    pub fn references(&self, device: &str) -> usize {
        self.entries.iter().filter(|e| e.device == device).count()
    }
}

fn clean(path: &str) -> PathBuf {
    Path::new(path).components().collect()
}

/// Decode `\040`-style octal escapes
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && is_octal(&bytes[i + 1..i + 4]) {
            let code = (bytes[i + 1] - b'0') * 64 + (bytes[i + 2] - b'0') * 8 + (bytes[i + 3] - b'0');
            out.push(code);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn is_octal(digits: &[u8]) -> bool {
    digits.len() == 3 && digits[0] <= b'3' && digits.iter().all(|d| (b'0'..=b'7').contains(d))
}
