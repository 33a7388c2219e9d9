// ssdb-common - Wire codec shared by the SSDB client
//
// This crate defines the command/response framing and the text encoding policy

pub mod command;
pub mod encoding;
pub mod error;
pub mod protocol;

// Re-export for convenience
pub use command::*;
pub use encoding::*;
pub use error::*;
pub use protocol::*;
