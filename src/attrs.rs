//! Data model shared across the codec, protocol primitives, and transfer
//! engine (spec.md §3): file attributes, handles, and directory entries.

/// POSIX-ish metadata carried by STAT/ATTRS/SETSTAT (spec.md §3).
///
/// Extended attributes are always consumed on receive and never emitted on
/// send, even if the caller sets `extended`, matching the reference
/// implementation this spec distills (spec.md §4.A).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileAttributes {
    pub size: Option<u64>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub permissions: Option<u32>,
    pub atime: Option<u32>,
    pub mtime: Option<u32>,
    /// Whether the flags word had SSH_FILEXFER_ATTR_EXTENDED set on
    /// decode. Never set by callers constructing attrs to send.
    pub had_extended: bool,
}

impl FileAttributes {
    /// Recomputes the flags word this record would encode to, following the
    /// field order spec.md §4.A fixes: size, uid+gid, permissions,
    /// atime+mtime. Extended attributes are never (re-)emitted.
    pub fn flags(&self) -> u32 {
        use crate::constants::*;
        let mut flags = 0u32;
        if self.size.is_some() {
            flags |= SSH_FILEXFER_ATTR_SIZE;
        }
        if self.uid.is_some() || self.gid.is_some() {
            flags |= SSH_FILEXFER_ATTR_UIDGID;
        }
        if self.permissions.is_some() {
            flags |= SSH_FILEXFER_ATTR_PERMISSIONS;
        }
        if self.atime.is_some() || self.mtime.is_some() {
            flags |= SSH_FILEXFER_ATTR_ACMODTIME;
        }
        flags
    }

    pub fn with_size(size: u64) -> Self {
        FileAttributes {
            size: Some(size),
            ..Default::default()
        }
    }

    pub fn with_permissions(permissions: u32) -> Self {
        FileAttributes {
            permissions: Some(permissions),
            ..Default::default()
        }
    }
}

/// An opaque server-issued handle from OPEN/OPENDIR (spec.md §3). Its bytes
/// are preserved exactly and never treated as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileHandle(pub Vec<u8>);

impl FileHandle {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// One entry from a READDIR/REALPATH NAME reply (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub filename: String,
    pub long_name: String,
    pub attrs: FileAttributes,
}

/// OPEN pflags, forwarded verbatim as a 32-bit word (spec.md §6).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags(pub u32);

impl OpenFlags {
    pub fn read() -> Self {
        OpenFlags(crate::constants::SSH_FXF_READ)
    }

    pub fn write_create_truncate() -> Self {
        use crate::constants::*;
        OpenFlags(SSH_FXF_WRITE | SSH_FXF_CREAT | SSH_FXF_TRUNC)
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}
