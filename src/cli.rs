use clap::{Parser, Subcommand};

/// Deskline support-chat backend
#[derive(Parser)]
#[command(name = "deskline", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the API server
    Serve {
        /// Port to bind (defaults to DESKLINE_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Apply pending database migrations and exit
    Migrate,

    /// Manage accounts
    User {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Maintain the access-token revocation ledger
    Revocations {
        #[command(subcommand)]
        command: RevocationCommands,
    },
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Create an account of any role
    Create {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        full_name: String,
        /// admin, agent or user
        #[arg(long, default_value = "agent")]
        role: String,
    },
    /// List all accounts
    List,
}

#[derive(Subcommand)]
pub enum RevocationCommands {
    /// Delete ledger entries whose tokens have expired
    Purge,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_user_create() {
        let cli = Cli::try_parse_from([
            "deskline", "user", "create", "--email", "a@b.io", "--password", "longenough",
            "--full-name", "Ann", "--role", "admin",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::User {
                command: UserCommands::Create { role, full_name, .. },
            }) => {
                assert_eq!(role, "admin");
                assert_eq!(full_name, "Ann");
            }
            _ => panic!("expected user create"),
        }
    }

    #[test]
    fn test_serve_port_is_optional() {
        let cli = Cli::try_parse_from(["deskline", "serve"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Serve { port: None })));
        let cli = Cli::try_parse_from(["deskline"]).unwrap();
        assert!(cli.command.is_none());
    }
}
