//! Ambar: word-granular software transactional memory with multi-version
//! snapshot reads.
//!
//! # Architecture
//!
//! Ambar implements a TL2-style (Transactional Locking II) protocol over a
//! segmented address space, at the granularity of one aligned word.
//!
//! - **Reads** are optimistic: a single atomic load of the word's latest
//!   version plus a versioned-lock check against the transaction's snapshot
//!   timestamp. Read-only transactions never abort; they walk the word's
//!   version history to the newest version at or before their snapshot.
//! - **Writes** are buffered locally. Locks are taken only during commit:
//!   acquire the write set, validate the read set, publish new versions
//!   under the commit clock.
//! - **Reclamation** rides a reference-counted chain of commit descriptors.
//!   A superseded version or freed segment is physically released only once
//!   every transaction pinned at an earlier snapshot has finished.
//!
//! # Example
//!
//! ```
//! use ambar::{Mode, SharedMemory};
//!
//! let mem = SharedMemory::new(32, 8);
//! let word0 = mem.start_addr();
//!
//! mem.run(Mode::ReadWrite, |tx| {
//!     let mut buf = [0u8; 8];
//!     tx.read(word0, &mut buf)?;
//!     let value = u64::from_le_bytes(buf) + 1;
//!     tx.write(&value.to_le_bytes(), word0)
//! })
//! .unwrap();
//! ```

mod addr;
mod alloc;
mod descriptor;
mod errors;
mod lock;
mod memory;
mod object;
mod segment;
mod transaction;

pub use addr::{SegmentId, WordAddr};
pub use errors::TxError;
pub use lock::{Timestamp, VersionedLock};
pub use memory::SharedMemory;
pub use transaction::{Mode, Transaction};
