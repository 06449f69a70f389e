//! Command-line interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use mailingest_core::Settings;

#[derive(Debug, Parser)]
#[command(name = "mailingest", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Config file (TOML). Falls back to $MAILINGEST_CONFIG, then the
    /// user config directory.
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// IMAP server host
    #[arg(long, global = true, env = "MAILINGEST_HOST")]
    pub host: Option<String>,

    /// IMAP user name
    #[arg(long, global = true, env = "MAILINGEST_USERNAME")]
    pub username: Option<String>,

    /// IMAP password
    #[arg(long, global = true, env = "MAILINGEST_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Domain whose recipients are ingested
    #[arg(long, global = true, env = "MAILINGEST_TARGET_DOMAIN")]
    pub target_domain: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Poll continuously until interrupted (default)
    Run,
    /// Run a single poll cycle, drain the workers and exit
    Once,
    /// Parse a raw message and print its reconstructed HTML
    Parse {
        /// Raw `.eml` file
        file: PathBuf,
        /// Write the HTML here and print a JSON summary instead
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Ingest stored raw messages again
    Reingest {
        /// Raw `.eml` files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

impl Cli {
    /// Applies flag and environment overrides on top of file settings.
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(host) = &self.host {
            settings.imap.host.clone_from(host);
        }
        if let Some(username) = &self.username {
            settings.imap.username.clone_from(username);
        }
        if let Some(password) = &self.password {
            settings.imap.password.clone_from(password);
        }
        if let Some(domain) = &self.target_domain {
            settings.monitor.target_domain.clone_from(domain);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_overrides_replace_file_values() {
        let cli = Cli::try_parse_from([
            "mailingest",
            "--host",
            "imap.corp.example",
            "--target-domain",
            "corp.example",
            "once",
        ])
        .unwrap();
        let mut settings = Settings::default();
        settings.imap.username = "from-file".to_string();
        cli.apply(&mut settings);

        assert_eq!(settings.imap.host, "imap.corp.example");
        assert_eq!(settings.imap.username, "from-file");
        assert_eq!(settings.monitor.target_domain, "corp.example");
        assert!(matches!(cli.command, Some(Command::Once)));
    }

    #[test]
    fn test_reingest_requires_files() {
        assert!(Cli::try_parse_from(["mailingest", "reingest"]).is_err());
    }
}
