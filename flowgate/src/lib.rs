//! Foreign-facing build of [`flowgate_core`].
//!
//! Produces the static and dynamic libraries the Swift and Kotlin bindings link
//! against. All functionality lives in `flowgate-core`.

pub use flowgate_core::*;

flowgate_core::uniffi_reexport_scaffolding!();
