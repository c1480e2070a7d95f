//! Key material generator for prooflayer-node.
//!
//! - `master-key`: a fresh 256-bit vault master key, hex-encoded
//! - `service-key`: a `pl_` service key and the digest the key store keeps
//! - `seal`: a backend credential sealed into a vault envelope
//!
//! Usage:
//!   cargo run --bin prooflayer-keygen -- master-key
//!   BYOK_ENCRYPTION_KEY=... cargo run --bin prooflayer-keygen -- seal --backend openai

use clap::{Parser, Subcommand};
use prooflayer_node::auth::{hash_service_key, SERVICE_KEY_PREFIX};
use prooflayer_node::config::SealedCredentialConfig;
use prooflayer_node::vault::{mask_secret, CredentialVault, MASTER_KEY_LEN};
use prooflayer_node::BackendKind;
use rand::rngs::OsRng;
use rand::RngCore;

/// Random bytes behind a service key.
const SERVICE_KEY_BYTES: usize = 24;

/// Generate vault keys, service keys and sealed credentials.
#[derive(Parser, Debug)]
#[command(name = "prooflayer-keygen")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a vault master key.
    MasterKey,

    /// Generate a service key and its stored digest.
    ServiceKey,

    /// Seal a backend credential with the vault master key.
    Seal {
        /// Backend the credential belongs to.
        #[arg(long)]
        backend: String,

        /// Credential to seal.
        #[arg(long, env = "PROOFLAYER_SEAL_SECRET", hide_env_values = true)]
        secret: String,

        /// Hex-encoded vault master key.
        #[arg(long, env = "BYOK_ENCRYPTION_KEY", hide_env_values = true)]
        master_key: String,
    },
}

fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    match cli.command {
        Command::MasterKey => {
            println!("{}", random_hex(MASTER_KEY_LEN));
            eprintln!("Store this in BYOK_ENCRYPTION_KEY. Losing it makes sealed credentials unreadable.");
        }
        Command::ServiceKey => {
            let key = format!("{SERVICE_KEY_PREFIX}{}", random_hex(SERVICE_KEY_BYTES));
            println!("key:    {key}");
            println!("digest: {}", hash_service_key(&key));
            eprintln!("Hand out the key once; keep only the digest.");
        }
        Command::Seal {
            backend,
            secret,
            master_key,
        } => {
            let backend: BackendKind = backend.parse()?;
            let vault = CredentialVault::from_hex(&master_key)?;
            let sealed = SealedCredentialConfig {
                backend,
                envelope: vault.encrypt(secret.trim())?,
            };
            eprintln!("Sealed {backend} credential {}", mask_secret(secret.trim()));
            println!("[[local_caller.byok_credentials]]");
            print!("{}", toml::to_string(&sealed)?);
        }
    }
    Ok(())
}
