//! Analyzers bundled with the edsync server.

#![forbid(unsafe_code)]

mod pom;

pub use pom::{PomAnalyzer, POM_FILE_NAME};
