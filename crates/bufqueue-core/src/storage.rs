//! Storage type definitions

/// Where a buffer's pixel memory lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StorageType {
    /// Process-local heap memory
    Heap = 0,
    /// Named POSIX shared memory, mappable by other processes
    Shared = 1,
}

/// Access mode for a CPU mapping of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}
