//! # System Module
//!
//! Stage state resolution over a key store: which stage is active, when it
//! started, when it ended and what that means for the workflow.

mod stage;

pub use stage::*;
