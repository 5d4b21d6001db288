pub mod command_stream;
pub mod error;

pub use command_stream::{capture_command, is_tool_installed, stream_command_lines};
pub use error::{Result, VmError};
