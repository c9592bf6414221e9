//! These models represent the objects passed around by the agent
//!
//! The transcript messages a human edits, the tools that executables
//! describe themselves with, and the calls a model issues against those
//! tools overlap but do not match any single wire format. They are kept
//! as plain internal structs and converted at the provider boundary.
pub mod message;
pub mod tool;
