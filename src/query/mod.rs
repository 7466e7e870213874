//! Query execution (§4.4, §4.5): a `Query` is constructed by the storage
//! manager against a fixed schema and fragment snapshot, submitted one or
//! more times against caller-supplied buffers, and drives a state machine
//! to `Completed`, `Overflowed` (read only), or `Failed`. Split into
//! `read`/`write` the way the teacher library splits its top-level
//! `read`/`write` free functions, generalized from "one EXR file" to
//! "a query over a set of immutable fragments".

pub mod buffers;
pub mod layout;
pub mod read;
pub mod write;

pub use buffers::QueryBuffers;
pub use read::ReadQuery;
pub use write::WriteQuery;

/// The state a query is in, exactly the four outcomes described in §4.4/§4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    InProgress,
    Completed,
    Overflowed,
    Failed,
}

/// Requested iteration order for a read (§4.4). `Global` is the schema's
/// own cell order; `RowMajor`/`ColumnMajor` engage the sorted-read adapter
/// and are only meaningful for dense arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadLayout {
    Global,
    RowMajor,
    ColumnMajor,
}

/// Requested submission order for a write (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteLayout {
    /// Client promises cells are already in the schema's global cell order.
    GlobalOrder,
    /// Sparse only: cells may arrive in any order across any number of submissions.
    Unordered,
    /// Dense only: cells arrive in row-major order over the write's subarray.
    SortedRow,
    /// Dense only: cells arrive in column-major order over the write's subarray.
    SortedCol,
}
