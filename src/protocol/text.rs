//! Memcached Text Protocol Commands
//!
//! One CRLF-terminated line per command, fields split on whitespace. The
//! line is parsed into a [`TextCommand`] so the session dispatch is
//! exhaustive instead of string-matched ad hoc.
//!
//! Parse failures carry enough shape for the session to pick the right wire
//! reply: a numeric field that does not parse is a [`TextError::BadNumber`]
//! (`CLIENT_ERROR`, connection stays open), anything else malformed is a
//! [`TextError::Malformed`] (`ERROR`).

use thiserror::Error;

/// Splits one already-delimited command line into its whitespace-separated
/// fields.
pub fn tokenize(line: &str) -> Vec<&str> {
    line.split_whitespace().collect()
}

/// A parsed memcached text command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextCommand {
    /// `set <key> <flags> <expiry> <bytes> [noreply]`; a data block of
    /// `length` bytes plus CRLF follows on the stream.
    Set {
        key: String,
        expiry: i64,
        length: usize,
        noreply: bool,
    },
    /// `get <key> [<key> ...]`
    Get { keys: Vec<String> },
    /// `delete <key> [noreply]`
    Delete { key: String, noreply: bool },
    /// `flush_all [noreply]`
    FlushAll { noreply: bool },
    /// `stats`
    Stats,
}

/// Why a command line failed to parse.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TextError {
    /// Unknown command word, wrong arity, or an empty line.
    #[error("malformed command line")]
    Malformed,

    /// A numeric field (expiry or byte count) that is not an integer.
    #[error("invalid numeric field: {0}")]
    BadNumber(String),
}

impl TextCommand {
    /// Parses one command line. Command words are matched
    /// case-insensitively; the `flags` field of `set` is accepted but not
    /// interpreted (replies always echo flags `0`).
    pub fn parse(line: &str) -> Result<Self, TextError> {
        let fields = tokenize(line);
        let Some(word) = fields.first() else {
            return Err(TextError::Malformed);
        };

        match word.to_ascii_lowercase().as_str() {
            "set" if fields.len() >= 5 => {
                let expiry: i64 = fields[3]
                    .parse()
                    .map_err(|_| TextError::BadNumber(fields[3].to_string()))?;
                let length: usize = fields[4]
                    .parse()
                    .map_err(|_| TextError::BadNumber(fields[4].to_string()))?;
                let noreply = fields[5..].iter().any(|t| *t == "noreply");
                Ok(TextCommand::Set {
                    key: fields[1].to_string(),
                    expiry,
                    length,
                    noreply,
                })
            }
            "get" if fields.len() >= 2 => Ok(TextCommand::Get {
                keys: fields[1..].iter().map(|k| k.to_string()).collect(),
            }),
            "delete" if fields.len() >= 2 => Ok(TextCommand::Delete {
                key: fields[1].to_string(),
                noreply: fields.get(2).is_some_and(|t| *t == "noreply"),
            }),
            "flush_all" => Ok(TextCommand::FlushAll {
                noreply: fields.get(1).is_some_and(|t| *t == "noreply"),
            }),
            "stats" => Ok(TextCommand::Stats),
            _ => Err(TextError::Malformed),
        }
    }
}
