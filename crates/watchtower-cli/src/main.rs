//! Watchtower operator command-line interface for key custody operations.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::warn;
use std::path::PathBuf;
use watchtower_core::{
    logging, KeyStoreContext, KeyType, OperatorConfig, SecretPrompt, TerminalPrompt,
};
use watchtower_keys::{KeyBackend, KeyRecord, KeySource, SelectedBackend, SystemRunner};

/// Top-level command-line options shared by every subcommand.
#[derive(Parser, Debug)]
#[command(
    name = "watchtower",
    version,
    about = "Watchtower operator utilities (encrypted key custody and config checks)."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage operator and watchtower signing keys.
    Keys {
        #[command(subcommand)]
        command: KeyCommands,
    },

    /// Validate an operator configuration file.
    Validate {
        /// Path to the configuration file to validate.
        #[arg(short = 'f', long = "config-file")]
        config_file: PathBuf,
    },
}

/// Key lifecycle operations over the selected custody backend.
#[derive(Subcommand, Debug)]
enum KeyCommands {
    /// Initialise the key store for the chosen backend.
    Init {
        /// Storage backend: gocryptfs or keystore.
        #[arg(short = 't', long = "key-type")]
        key_type: KeyType,

        /// Skip the password entropy check.
        #[arg(short = 'i', long)]
        insecure: bool,
    },

    /// Generate a new random key.
    Create {
        /// Name of the key inside the store; defaults to the derived address.
        #[arg(short = 'k', long = "key-name")]
        key_name: Option<String>,

        #[arg(short = 't', long = "key-type")]
        key_type: KeyType,

        #[arg(short = 'i', long)]
        insecure: bool,
    },

    /// Import an existing private key (read from a hidden prompt).
    Import {
        /// Name of the key inside the store; defaults to the derived address.
        #[arg(short = 'k', long = "key-name")]
        key_name: Option<String>,

        #[arg(short = 't', long = "key-type")]
        key_type: KeyType,

        #[arg(short = 'i', long)]
        insecure: bool,
    },

    /// Print the address and private key for a stored key.
    Export {
        #[arg(short = 'k', long = "key-name")]
        key_name: String,

        #[arg(short = 't', long = "key-type")]
        key_type: KeyType,
    },

    /// Delete a stored key.
    Delete {
        #[arg(short = 'k', long = "key-name")]
        key_name: String,

        #[arg(short = 't', long = "key-type")]
        key_type: KeyType,
    },

    /// List the keys in the store.
    List {
        #[arg(short = 't', long = "key-type")]
        key_type: KeyType,
    },
}

/// Entry point: parse arguments and surface errors with an exit code.
fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    logging::init("info");
    let cli = Cli::parse();

    match cli.command {
        Commands::Keys { command } => run_key_command(command),
        Commands::Validate { config_file } => {
            let config = OperatorConfig::load(&config_file).with_context(|| {
                format!("failed to validate {}", config_file.display())
            })?;
            print_config_summary(&config);
            resolve_configured_keys(config)
        }
    }
}

/// Run one key operation with a store that is always released afterwards,
/// on the error path included.
fn with_backend<F>(key_type: KeyType, op: F) -> Result<()>
where
    F: FnOnce(&mut SelectedBackend<SystemRunner, TerminalPrompt>) -> Result<()>,
{
    let ctx = KeyStoreContext::from_home()?;
    let mut backend = SelectedBackend::select(
        key_type,
        ctx,
        SystemRunner::default(),
        TerminalPrompt::default(),
    );

    let result = op(&mut backend);
    if let Err(release_err) = backend.release() {
        warn!("failed to release the key store: {release_err}");
    }
    result
}

fn run_key_command(command: KeyCommands) -> Result<()> {
    match command {
        KeyCommands::Init { key_type, insecure } => with_backend(key_type, |backend| {
            backend.init(insecure)?;
            println!("Initialised {key_type} key store.");
            Ok(())
        }),
        KeyCommands::Create {
            key_name,
            key_type,
            insecure,
        } => with_backend(key_type, |backend| {
            match backend.create(key_name.as_deref(), insecure)? {
                Some(created) => {
                    println!("Created key {} at {}.", created.name, created.path.display());
                    println!("Address: {}", created.address);
                }
                None => println!("Kept the existing key."),
            }
            Ok(())
        }),
        KeyCommands::Import {
            key_name,
            key_type,
            insecure,
        } => {
            // The key never travels via argv; it is read from a hidden prompt.
            let mut prompt = TerminalPrompt::default();
            let private_key = prompt.read_secret("Enter private key: ")?;
            with_backend(key_type, |backend| {
                match backend.import(key_name.as_deref(), &private_key, insecure)? {
                    Some(created) => {
                        println!("Imported key {} at {}.", created.name, created.path.display());
                        println!("Address: {}", created.address);
                    }
                    None => println!("Kept the existing key."),
                }
                Ok(())
            })
        }
        KeyCommands::Export { key_name, key_type } => with_backend(key_type, |backend| {
            let exported = backend.export(&key_name)?;
            println!("Address:     {}", exported.address);
            println!("Private key: 0x{}", exported.private_key_hex.as_str());
            Ok(())
        }),
        KeyCommands::Delete { key_name, key_type } => with_backend(key_type, |backend| {
            let path = backend.delete(&key_name)?;
            println!("Deleted key {} ({}).", key_name, path.display());
            Ok(())
        }),
        KeyCommands::List { key_type } => with_backend(key_type, |backend| {
            print_key_table(&backend.list()?);
            Ok(())
        }),
    }
}

/// Resolve every configured key through its custody backend and print the
/// derived addresses. Mounts are released afterwards, error path included.
fn resolve_configured_keys(config: OperatorConfig) -> Result<()> {
    let ctx = KeyStoreContext::from_home()?;
    let has_operator =
        config.operator_private_key.is_some() || config.operator_encrypted_key.is_some();
    let mut source = KeySource::new(
        config,
        ctx,
        SystemRunner::default(),
        TerminalPrompt::default(),
    )?;

    let result = (|| -> Result<()> {
        source.use_encrypted_keys()?;
        if has_operator {
            println!("  Operator address: {}", source.operator_key()?.address());
        }
        for key in source.watchtower_keys()? {
            println!("  Watchtower address: {}", key.address());
        }
        Ok(())
    })();

    if let Err(release_err) = source.release() {
        warn!("failed to release the key store: {release_err}");
    }
    result
}

/// Render a simple table of stored keys.
fn print_key_table(records: &[KeyRecord]) {
    if records.is_empty() {
        println!("No keys stored.");
        return;
    }

    println!("{:<24} {:<20} PATH", "KEY", "CREATED");
    for record in records {
        println!(
            "{:<24} {:<20} {}",
            record.name,
            record.created.as_deref().unwrap_or("-"),
            record.path.display()
        );
    }
}

fn print_config_summary(config: &OperatorConfig) {
    println!("Configuration valid.");
    println!(
        "  Watchtower keys: {} plaintext, {} encrypted",
        config.watchtower_private_keys.len(),
        config.watchtower_encrypted_keys.len()
    );
    let operator = if config.operator_private_key.is_some() {
        "plaintext"
    } else if config.operator_encrypted_key.is_some() {
        "encrypted"
    } else {
        "not set"
    };
    println!("  Operator key: {operator}");
    match config.encrypted_key_type {
        Some(key_type) => println!("  Encrypted key type: {key_type}"),
        None => println!("  Encrypted key type: not set"),
    }
    if config.eth_rpc_url.is_empty() {
        println!("  RPC endpoint: not set");
    } else {
        println!("  RPC endpoint: {}", config.eth_rpc_url);
    }
    println!(
        "  Gas limit: {}, receipt timeout: {}s, expiry: {} day(s)",
        config.gas_limit, config.tx_receipt_timeout, config.expiry_in_days
    );
}
