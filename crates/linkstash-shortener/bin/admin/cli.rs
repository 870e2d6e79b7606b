use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub use linkstash_storage::DEFAULT_DELETION_BUFFER;

pub const FILE_STORAGE_PATH_ENV: &str = "LINKSTASH_FILE_STORAGE_PATH";
pub const DATABASE_DSN_ENV: &str = "LINKSTASH_DATABASE_DSN";
pub const MAX_CONNECTIONS_ENV: &str = "LINKSTASH_MAX_CONNECTIONS";
pub const DELETION_BUFFER_ENV: &str = "LINKSTASH_DELETION_BUFFER";
pub const LOG_JSON_ENV: &str = "LINKSTASH_LOG_JSON";

pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Parser)]
#[command(name = "linkstash-admin", version, about = "Inspect and edit a linkstash URL store")]
pub struct CLI {
    /// Journal file for the volatile store. Ignored when a DSN is given.
    #[arg(long, env = FILE_STORAGE_PATH_ENV)]
    pub file_storage_path: Option<PathBuf>,

    /// PostgreSQL connection string. Selects the relational store.
    #[arg(long, env = DATABASE_DSN_ENV)]
    pub database_dsn: Option<String>,

    #[arg(long, env = MAX_CONNECTIONS_ENV, default_value_t = DEFAULT_MAX_CONNECTIONS)]
    pub max_connections: u32,

    #[arg(long, env = DELETION_BUFFER_ENV, default_value_t = DEFAULT_DELETION_BUFFER)]
    pub deletion_buffer: usize,

    /// Emit logs as JSON lines.
    #[arg(long, env = LOG_JSON_ENV)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Store a URL and print its short key.
    Shorten {
        url: String,
        #[arg(long, default_value = "")]
        user: String,
    },
    /// Print the original URL behind a short key.
    Resolve { key: String },
    /// List a user's live URLs.
    List {
        #[arg(long)]
        user: String,
    },
    /// Soft-delete some of a user's short keys and wait for the result.
    Delete {
        #[arg(long)]
        user: String,
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Print live URL and user counts.
    Stats,
    /// Check the database connection.
    Ping,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        CLI::command().debug_assert();
    }

    #[test]
    fn parses_delete_with_keys() {
        let cli = CLI::try_parse_from(["linkstash-admin", "delete", "--user", "u1", "AAA", "BBB"])
            .unwrap();

        assert!(matches!(
            cli.command,
            Command::Delete { ref user, ref keys } if user == "u1" && keys.len() == 2
        ));
        assert_eq!(cli.deletion_buffer, DEFAULT_DELETION_BUFFER);
    }

    #[test]
    fn delete_requires_keys() {
        assert!(CLI::try_parse_from(["linkstash-admin", "delete", "--user", "u1"]).is_err());
    }
}
