pub mod analysis;
pub mod cli;
pub mod condition;
pub mod config;
pub mod context;
pub mod init;
pub mod region;
pub mod resolver;
pub mod terminator;

// Re-export the runtime surface
pub use condition::{kinds, Condition, DefectKind, Family, FaultKind, Kind};
pub use resolver::{protect, raise, Catch, Resolution, Scope, Unwind};

// Re-export init API for convenience
pub use init::{initialize, InitBuilder, InitOptions};
