//! Command-line surface for exercising the engine directly: create a
//! container, run single-operation transactions against it, or replay
//! an existing data directory and print what's there.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::core::value::TransactionValue;
use crate::error::{Error, Result};

#[derive(Parser)]
#[command(name = "gostore")]
#[command(about = "Segmented, log-structured transactional key/value storage engine")]
pub struct Cli {
    /// Directory holding this engine's segment files.
    #[arg(short = 'd', long, default_value = "./data")]
    pub data_dir: PathBuf,

    /// Local token range this engine instance owns, written `from:to`.
    #[arg(long, default_value = "0:1")]
    pub token_range: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a container if it doesn't already exist.
    CreateContainer {
        name: String,
    },
    /// Run a single `Set container.key = value` transaction.
    Set {
        container: String,
        key: String,
        value: String,
    },
    /// Run a single `Return Get(container.key)` transaction and print it.
    Get {
        container: String,
        key: String,
    },
    /// Run a small canned scenario end to end (set then get in one
    /// transaction) against a fresh container, printing the returns.
    Demo,
}

/// Parse `"from:to"` into a token range pair.
pub fn parse_token_range(s: &str) -> Result<(u16, u16)> {
    let (from, to) = s
        .split_once(':')
        .ok_or_else(|| Error::Other(format!("invalid token range {s:?}, expected \"from:to\"")))?;
    let from: u16 = from.parse().map_err(|_| Error::Other(format!("bad token range start: {from:?}")))?;
    let to: u16 = to.parse().map_err(|_| Error::Other(format!("bad token range end: {to:?}")))?;
    Ok((from, to))
}

pub fn format_value(v: &TransactionValue) -> String {
    match v {
        TransactionValue::Null => "null".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_range() {
        assert_eq!(parse_token_range("0:256").unwrap(), (0, 256));
    }

    #[test]
    fn rejects_a_range_with_no_colon() {
        assert!(parse_token_range("256").is_err());
    }
}
