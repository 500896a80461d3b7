//! # Core Module
//!
//! Fundamental concurrency primitives and the crate's error taxonomy.
//!
//! ## Key Components
//! - `MtResource`: Thread-safe reference-counted resource with read-write locking,
//!   used for data the tick thread mutates while worker threads read it
//! - `StResource`: Single-threaded reference-counted resource, used for state
//!   pinned to the tick thread
//! - `error`: Error enums for every subsystem
//!
//! ## Usage
//! ```rust
//! use vessel_engine::core::{MtResource, StResource};
//!
//! let shared = MtResource::new(0);
//! *shared.get_mut() += 1;
//! assert_eq!(*shared.get(), 1);
//!
//! let local = StResource::new(vec![1, 2]);
//! local.get_mut().push(3);
//! assert_eq!(local.get().len(), 3);
//! ```

pub mod error;
pub mod mt_resource;
pub mod st_resource;

pub use mt_resource::MtResource;
pub use st_resource::StResource;
