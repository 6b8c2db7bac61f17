//! Wire protocol between the GridOps control plane and `gridops-runner`.
//!
//! One request per connection: the client writes a single JSON object,
//! half-closes its side, and reads a single JSON [`Response`] until EOF.
//! There is no length prefix; the message boundary is the connection
//! boundary.
//!
//! ```json
//! {"command": "start_app", "app_slug": "wiki"}
//! {"status": "success", "stdout": "...", "stderr": ""}
//! ```

pub mod command;
pub mod response;

pub use command::{COMMAND_NAMES, Command, ControlAction, ProtocolError, parse_request};
pub use response::{Response, Status};
