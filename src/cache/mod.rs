//! Cache Module
//!
//! Resource-bounding caches shared by every table of one store instance.
//!
//! ## Responsibilities
//! - [`IndexCache`]: bound the memory spent on parsed table indexes
//! - [`FdCache`]: bound the number of open table file descriptors
//!
//! Both are advisory: a miss costs a re-parse or a re-open, never a wrong
//! answer. They are constructed per store and injected, never global.

mod fd_cache;
mod index_cache;

pub use fd_cache::{FdCache, FileRef};
pub use index_cache::IndexCache;
