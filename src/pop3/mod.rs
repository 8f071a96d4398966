//! POP3 server side: wire framing, command table and the per-connection
//! engine

mod command;
mod engine;
mod hooks;
mod io;
mod session;

pub use command::{
    COMMANDS, Command, CommandDescriptor, lookup, parse_message_number, parse_top_args,
};
pub use engine::{IDENT, ProtocolEngine};
pub use hooks::{Hooks, Listing, Reply, Response, split_lines};
pub use io::MAX_LINE;
pub use session::{Session, State};
