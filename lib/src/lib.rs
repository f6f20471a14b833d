//! Stack map frame, max stack and max locals inference for JVM method bodies
//!
//! See [`jvm`] for an example, and [`jvm::verifier`] for how the analysis works.

pub mod jvm;
pub mod util;
