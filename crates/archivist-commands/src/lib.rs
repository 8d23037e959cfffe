//! Chat command surface for Archivist.
//!
//! Maps prefixed command text to the history orchestrator and the
//! bot-admin-gated shutdown action.

pub mod command_dispatch;
pub mod command_text;
pub mod shutdown;

pub use command_dispatch::*;
pub use command_text::*;
pub use shutdown::*;
