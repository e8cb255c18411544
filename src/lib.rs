// src/lib.rs
//! Batched, concurrency-safe access to an LMDB environment.
//!
//! [`Lmdb::open`] opens an environment and starts one writer thread. Every
//! [`Client::update`] is queued to that thread, which runs whatever is
//! waiting as a single write transaction, so many small concurrent updates
//! cost one commit. When the map runs out of room the writer grows it and
//! runs the batch again. [`Client::view`] runs a read-only transaction on
//! the calling thread, reusing pooled read handles between views.
//!
//! ```no_run
//! use batchmdb::{flags::DbFlags, flags::WriteFlags, Error, Lmdb, Options};
//!
//! # fn main() -> Result<(), Error> {
//! let lmdb = Lmdb::open("/tmp/db", Options::default())?;
//! let client = lmdb.client();
//!
//! client.update(|txn| {
//!     let db = txn.open_db(None, DbFlags::empty())?;
//!     txn.put(db, b"hello", b"world", WriteFlags::empty())
//! })?;
//!
//! let value = client.view(|txn| {
//!     let db = txn.open_db(None, DbFlags::empty())?;
//!     Ok::<_, Error>(txn.get(db, b"hello")?.map(<[u8]>::to_vec))
//! })?;
//! assert_eq!(value.as_deref(), Some(&b"world"[..]));
//!
//! lmdb.terminate_sync();
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod constants;
mod coordinator;
mod cursor;
mod database;
mod env;
mod error;
mod reader;
mod transaction;
mod types;
mod value;

pub use client::{Client, Lmdb};
pub use config::Options;
pub use constants::{DEFAULT_BATCH_SIZE, DEFAULT_MAX_DBS, DEFAULT_MAX_READERS, DEFAULT_MODE};
pub use cursor::{RoCursor, RwCursor};
pub use database::Database;
pub use env::Environment;
pub use error::{Error, Result};
pub use transaction::{RoTxn, RwTxn};
pub use types::{CursorOp, EnvInfo, Stat};

/// Environment, database, write and copy flags
pub mod flags {
    pub use crate::constants::{CopyFlags, DbFlags, EnvFlags, WriteFlags};
}
