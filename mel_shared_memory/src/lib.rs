//! # MEL Shared Memory
//!
//! Named shared exchange segments ("MelShare") for publishing live signal
//! buffers between processes on one host.
//!
//! ## Features
//!
//! - **Named segments**: any process that knows the name attaches to the same bytes
//! - **Fixed capacity**: the first opener sets it; oversized writes fail untouched
//! - **Bounded locking**: `flock`-based cross-process lock with a timeout, so a
//!   slow reader never stalls the writer's cycle
//! - **Torn write detection**: odd/even write sequence in the header
//! - **Message channel**: a companion text region per segment
//!
//! ## Example
//!
//! ```rust,no_run
//! use mel_shared_memory::{MelShare, ShmResult};
//!
//! fn main() -> ShmResult<()> {
//!     let mut share = MelShare::open("scope")?;
//!     share.write_data(&[0.0f64, 0.5, 1.0])?;
//!
//!     let values: Vec<f64> = share.read_vec()?;
//!     assert_eq!(values.len(), 3);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod element;
pub mod error;
pub mod lock;
pub mod melshare;
pub mod platform;
pub mod segment;

pub use element::Element;
pub use error::{ShmError, ShmResult};
pub use melshare::{
    MelShare, ShmOptions, read_map, read_message_from, write_map, write_message_to,
};
pub use segment::{HEADER_SIZE, SharedRegion};
