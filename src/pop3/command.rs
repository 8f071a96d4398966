//! Command table and argument parsing

use super::session::State;
use crate::error::{Error, Result};

/// Every command the engine dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Capa,
    User,
    Pass,
    Apop,
    Quit,
    Stat,
    List,
    Uidl,
    Retr,
    Dele,
    Noop,
    Rset,
    Top,
}

/// One row of [`COMMANDS`].
#[derive(Debug, Clone, Copy)]
pub struct CommandDescriptor {
    /// Wire name, matched case-sensitively.
    pub name: &'static str,
    /// Required state, or `None` for commands valid in any state.
    pub state: Option<State>,
    pub command: Command,
}

const fn entry(name: &'static str, state: Option<State>, command: Command) -> CommandDescriptor {
    CommandDescriptor {
        name,
        state,
        command,
    }
}

const AUTH: Option<State> = Some(State::Authorization);
const TRANS: Option<State> = Some(State::Transaction);

pub static COMMANDS: [CommandDescriptor; 13] = [
    entry("CAPA", None, Command::Capa),
    entry("USER", AUTH, Command::User),
    entry("PASS", AUTH, Command::Pass),
    entry("APOP", AUTH, Command::Apop),
    entry("QUIT", None, Command::Quit),
    entry("STAT", TRANS, Command::Stat),
    entry("LIST", TRANS, Command::List),
    entry("UIDL", TRANS, Command::Uidl),
    entry("RETR", TRANS, Command::Retr),
    entry("DELE", TRANS, Command::Dele),
    entry("NOOP", TRANS, Command::Noop),
    entry("RSET", TRANS, Command::Rset),
    entry("TOP", TRANS, Command::Top),
];

#[must_use]
pub fn lookup(name: &str) -> Option<&'static CommandDescriptor> {
    COMMANDS.iter().find(|d| d.name == name)
}

/// Split a command line at the first space.
#[must_use]
pub fn split(line: &str) -> (&str, Option<&str>) {
    match line.split_once(' ') {
        Some((name, arg)) => (name, Some(arg)),
        None => (line, None),
    }
}

fn parse_count(arg: &str) -> Option<usize> {
    let digits = arg.strip_prefix('+').unwrap_or(arg);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Parse a 1-based message number. `usage` names the command in the
/// syntax error.
///
/// # Errors
///
/// Returns [`Error::Syntax`] if the argument is missing, not a number,
/// or zero.
pub fn parse_message_number(arg: Option<&str>, usage: &str) -> Result<usize> {
    arg.and_then(parse_count)
        .filter(|n| *n >= 1)
        .ok_or_else(|| Error::Syntax(usage.to_string()))
}

/// Parse the `<n> <lines>` argument of TOP. `lines` may be zero.
///
/// # Errors
///
/// Returns [`Error::Syntax`] unless the argument is a message number and
/// a line count separated by one space.
pub fn parse_top_args(arg: Option<&str>) -> Result<(usize, usize)> {
    const USAGE: &str = "TOP <n> <lines>";
    let (n, lines) = arg
        .and_then(|a| a.split_once(' '))
        .ok_or_else(|| Error::Syntax(USAGE.to_string()))?;
    let n = parse_message_number(Some(n), USAGE)?;
    let lines = parse_count(lines).ok_or_else(|| Error::Syntax(USAGE.to_string()))?;
    Ok((n, lines))
}
