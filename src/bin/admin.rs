use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use telegraph_server::config::expand_path;
use telegraph_server::credentials::CredentialStore;
use telegraph_server::keys::generate_keypair;
use telegraph_server::registry::{AccountRegistry, User};

#[derive(Parser)]
#[command(name = "telegraph-admin", about = "Provision telegraph accounts")]
struct Cli {
    /// Config directory holding users.json and passwd
    #[arg(short, long, default_value = "~/.telegraph")]
    config_dir: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Add a new user
    Adduser {
        /// The username of the new user
        username: String,
        /// The full name of the new user
        #[arg(short, long)]
        fullname: Option<String>,
        /// The email of the new user
        #[arg(short, long)]
        email: Option<String>,
        /// The password for the new user
        #[arg(short, long)]
        password: String,
        /// Give the user admin rights
        #[arg(short, long)]
        admin: bool,
    },
    /// Show user info
    Showuser {
        /// The username of the user
        username: String,
    },
}

fn print_user(username: &str, user: &User) {
    println!("{}:", username);
    println!("  Full name: {}", user.fullname.as_deref().unwrap_or(username));
    println!("     E-mail: {}", user.email.as_deref().unwrap_or("-"));
    println!("      Admin: {}", if user.admin { "yes" } else { "no" });
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let dir = expand_path(&cli.config_dir);

    if !dir.exists() {
        println!("Creating config dir \"{}\"", dir.display());
        std::fs::create_dir_all(&dir)?;
    }

    match cli.command {
        Command::Adduser {
            username,
            fullname,
            email,
            password,
            admin,
        } => {
            let mut registry = AccountRegistry::load(&dir)?;
            if registry.contains(&username) {
                bail!("user \"{}\" already exists", username);
            }

            let mut credentials = CredentialStore::load(&dir)?;
            credentials.add_user(&username, &password)?;

            println!("Generating RSA keypair for {}...", username);
            let (private_key, public_key) = generate_keypair()?;

            let user = User {
                fullname: fullname.or_else(|| Some(username.clone())),
                email,
                admin,
                private_key,
                public_key,
            };

            registry.insert(username.clone(), user);
            registry.save(&dir)?;

            if let Some(user) = registry.get(&username) {
                print_user(&username, user);
            }
        }

        Command::Showuser { username } => {
            let registry = AccountRegistry::load(&dir)?;
            match registry.get(&username) {
                Some(user) => print_user(&username, user),
                None => println!("No such user \"{}\"", username),
            }
        }
    }

    Ok(())
}
