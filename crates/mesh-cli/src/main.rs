//! meshkey: node identity, signing, and wire message tooling.

#![forbid(unsafe_code)]

use std::io::Read;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use mesh_common::NodeConfig;
use mesh_core::{PositionMessage, WaypointMessage};
use mesh_crypto::{
    Access, FileKeyStore, IdentityConfig, IdentityManager, KeyStore, MeshId, OsRandom,
    StoreSession, PUBLIC_KEY_SIZE,
};

#[derive(Parser, Debug)]
#[command(name = "meshkey")]
#[command(about = "Mesh node identity and wire message tools")]
struct Args {
    /// Key store directory (overrides the config file)
    #[arg(long, env = "MESHKEY_STORE", global = true)]
    store: Option<PathBuf>,

    /// Node config file (JSON)
    #[arg(long, env = "MESHKEY_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load the node identity, generating and persisting one if needed
    Init,

    /// Show the stored identity without generating one
    ShowId,

    /// Sign a message with the node identity
    Sign {
        /// Message text
        message: String,

        /// Treat the message as hex-encoded bytes
        #[arg(long)]
        hex: bool,
    },

    /// Verify a signature against a public key
    Verify {
        /// Public key: 64 hex characters or a mesh id
        #[arg(short, long)]
        public_key: String,

        /// Signature, hex-encoded
        #[arg(short, long)]
        signature: String,

        /// Message text
        message: String,

        /// Treat the message as hex-encoded bytes
        #[arg(long)]
        hex: bool,
    },

    /// Derive the shared secret with a peer
    SharedSecret {
        /// Peer public key: 64 hex characters or a mesh id
        peer: String,
    },

    /// Encode a position report from JSON (argument or stdin)
    EncodePosition { json: Option<String> },

    /// Decode a hex-encoded position report to JSON
    DecodePosition { hex: String },

    /// Encode a waypoint from JSON (argument or stdin)
    EncodeWaypoint { json: Option<String> },

    /// Decode a hex-encoded waypoint to JSON
    DecodeWaypoint { hex: String },

    /// Show version information
    Version,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = NodeConfig::load_or_default(args.config.as_deref())
        .context("failed to load node config")?;
    if let Some(store) = args.store {
        config.store_dir = store;
    }

    mesh_common::init_tracing_with_default(&config.log_level);

    match args.command {
        Command::Init => {
            let identity = open_identity(&config)?;
            print_identity(&identity.public_key());
        }
        Command::ShowId => {
            let store = FileKeyStore::new(&config.store_dir);
            let session = store
                .open(&config.namespace, Access::ReadOnly)
                .context("failed to open key store")?;
            let public_key_name = IdentityConfig::default().public_key_name;
            let Some(public_key) = session.get_bytes(&public_key_name)? else {
                bail!("no identity stored in {}", config.store_dir.display());
            };
            let public_key: [u8; PUBLIC_KEY_SIZE] = public_key
                .as_slice()
                .try_into()
                .context("stored public key has the wrong length")?;
            print_identity(&public_key);
        }
        Command::Sign { message, hex } => {
            let identity = open_identity(&config)?;
            let message = message_bytes(&message, hex)?;
            println!("{}", hex::encode(identity.sign(&message)?));
        }
        Command::Verify {
            public_key,
            signature,
            message,
            hex,
        } => {
            let public_key = parse_public_key(&public_key)?;
            let signature = hex::decode(signature.trim()).context("invalid signature hex")?;
            let message = message_bytes(&message, hex)?;

            if !mesh_crypto::verify(&public_key, &signature, &message) {
                bail!("signature is not valid");
            }
            println!("valid");
        }
        Command::SharedSecret { peer } => {
            let identity = open_identity(&config)?;
            let peer = parse_public_key(&peer)?;
            let secret = identity.derive_shared_secret(&peer)?;
            println!("{}", hex::encode(secret.as_bytes()));
        }
        Command::EncodePosition { json } => {
            let msg: PositionMessage =
                serde_json::from_str(&json_input(json)?).context("invalid position JSON")?;
            println!("{}", hex::encode(mesh_core::encode_position(&msg)));
        }
        Command::DecodePosition { hex } => {
            let bytes = hex::decode(hex.trim()).context("invalid hex")?;
            let msg = mesh_core::decode_position(&bytes)?;
            println!("{}", serde_json::to_string_pretty(&msg)?);
        }
        Command::EncodeWaypoint { json } => {
            let msg: WaypointMessage =
                serde_json::from_str(&json_input(json)?).context("invalid waypoint JSON")?;
            println!("{}", hex::encode(mesh_core::encode_waypoint(&msg)?));
        }
        Command::DecodeWaypoint { hex } => {
            let bytes = hex::decode(hex.trim()).context("invalid hex")?;
            let msg = mesh_core::decode_waypoint(&bytes)?;
            println!("{}", serde_json::to_string_pretty(&msg)?);
        }
        Command::Version => {
            println!("meshkey {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

fn open_identity(config: &NodeConfig) -> Result<IdentityManager<FileKeyStore, OsRandom>> {
    let identity_config = IdentityConfig {
        namespace: config.namespace.clone(),
        max_generate_attempts: config.max_generate_attempts,
        ..IdentityConfig::default()
    };

    tracing::debug!(store = %config.store_dir.display(), "opening identity store");
    let mut identity = IdentityManager::with_config(
        FileKeyStore::new(&config.store_dir),
        OsRandom,
        identity_config,
    );
    identity
        .initialize()
        .with_context(|| format!("failed to initialize identity in {}", config.store_dir.display()))?;
    Ok(identity)
}

fn print_identity(public_key: &[u8; PUBLIC_KEY_SIZE]) {
    println!("Node ID:    {:#04x}", public_key[0]);
    println!("Mesh ID:    {}", MeshId::from_bytes(public_key));
    println!("Public key: {}", hex::encode(public_key));
}

/// Accepts a public key as hex or as a mesh id.
fn parse_public_key(input: &str) -> Result<[u8; PUBLIC_KEY_SIZE]> {
    let input = input.trim();
    if input.len() == PUBLIC_KEY_SIZE * 2 {
        if let Ok(bytes) = hex::decode(input) {
            let mut key = [0u8; PUBLIC_KEY_SIZE];
            key.copy_from_slice(&bytes);
            return Ok(key);
        }
    }

    Ok(MeshId::parse(input)?.to_bytes()?)
}

fn message_bytes(message: &str, is_hex: bool) -> Result<Vec<u8>> {
    if is_hex {
        hex::decode(message.trim()).context("invalid message hex")
    } else {
        Ok(message.as_bytes().to_vec())
    }
}

fn json_input(arg: Option<String>) -> Result<String> {
    match arg {
        Some(json) => Ok(json),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read JSON from stdin")?;
            Ok(buf)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_public_key_forms() {
        let key = [0x8a; PUBLIC_KEY_SIZE];
        let from_hex = parse_public_key(&hex::encode(key)).unwrap();
        let from_mesh_id = parse_public_key(MeshId::from_bytes(&key).as_str()).unwrap();

        assert_eq!(from_hex, key);
        assert_eq!(from_mesh_id, key);
        assert!(parse_public_key("abcd").is_err());
    }

    #[test]
    fn test_message_bytes() {
        assert_eq!(message_bytes("hi", false).unwrap(), b"hi");
        assert_eq!(message_bytes("6869", true).unwrap(), b"hi");
        assert!(message_bytes("zz", true).is_err());
    }
}
