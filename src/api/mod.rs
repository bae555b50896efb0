//! Thin HTTP invocation surface over the three data-plane workers
//! (SPEC_FULL.md §6). Deliberately minimal: parameter validation plus a
//! JSON envelope, no business logic — that lives in `worker`.

mod handlers;

pub use handlers::{copy_handler, hash_handler, reindex_handler, AppState};
