

#![warn(
    rust_2018_idioms,
    future_incompatible,
    unused_extern_crates,
    unused,

    missing_copy_implementations,
    missing_debug_implementations,

    clippy::all,
    clippy::restriction,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
)]

#![deny(
    unused_variables,
    unused_assignments,
    dead_code,
    unused_must_use,
    missing_copy_implementations,
    trivial_numeric_casts,
    redundant_semicolon
)]

#![forbid(unsafe_code)]

// TODO #![warn(missing_docs)]


pub mod error;
pub mod io; // public to allow for custom tile chunk framing by embedders

pub mod math;
pub mod schema;
pub mod codec;
pub mod tile;
pub mod vfs;
pub mod fragment;
pub mod cache;
pub mod storage;
pub mod query;
pub mod kv;

#[macro_use]
extern crate smallvec;

/// Re-exports of the types most client code needs for opening an array and
/// running a query.
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::schema::{ArrayMode, Attribute, CellOrder, Codec, Dimension, Schema, ScalarType, TileOrder};
    pub use crate::vfs::{LocalVfs, MemVfs, Vfs};
    pub use crate::storage::{StorageManager, StorageManagerConfig};
    pub use crate::query::{QueryBuffers, QueryStatus, ReadLayout, ReadQuery, WriteLayout, WriteQuery};
    pub use crate::kv::{Key, KvStore};
}



