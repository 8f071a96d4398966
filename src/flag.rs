//! Message flags as reported by (and pushed to) the backend

use std::fmt;

/// A backend message flag.
///
/// Only `\Seen` carries meaning for the gateway: a seen message counts as
/// already retrieved and is left out of the POP3 listing, and deleting a
/// message over POP3 marks it seen on the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Flag {
    Seen,
    Answered,
    Flagged,
    Deleted,
    Draft,
    /// Anything else, verbatim.
    Keyword(String),
}

impl Flag {
    /// The IMAP wire representation of this flag.
    #[must_use]
    pub fn as_imap_str(&self) -> &str {
        match self {
            Self::Seen => "\\Seen",
            Self::Answered => "\\Answered",
            Self::Flagged => "\\Flagged",
            Self::Deleted => "\\Deleted",
            Self::Draft => "\\Draft",
            Self::Keyword(kw) => kw,
        }
    }

    /// Space-separated list suitable for a `STORE` flag list.
    #[must_use]
    pub fn join(flags: &[Self]) -> String {
        flags
            .iter()
            .map(Self::as_imap_str)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_imap_str())
    }
}

impl From<async_imap::types::Flag<'_>> for Flag {
    fn from(flag: async_imap::types::Flag<'_>) -> Self {
        use async_imap::types::Flag as Imap;
        match flag {
            Imap::Seen => Self::Seen,
            Imap::Answered => Self::Answered,
            Imap::Flagged => Self::Flagged,
            Imap::Deleted => Self::Deleted,
            Imap::Draft => Self::Draft,
            Imap::Custom(name) => Self::Keyword(name.into_owned()),
            other => Self::Keyword(format!("{other:?}")),
        }
    }
}
