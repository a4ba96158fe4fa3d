use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use display_auth::config::Config;
use display_auth::device::{
    CredentialStore, FileSecretStore, HardwareIdentity, HostHardware, RequestSigner,
    StaticHardware,
};
use display_auth::protocol::APP_TOKEN_TYPE;
use display_auth::server::{
    AppClaims, DeviceClaims, DeviceRecord, DeviceRegistry, DeviceStatus, SigningKey,
    SqliteDeviceRegistry, TokenIssuer, TokenPolicy, TokenVerifier,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Device identity, request signing and token service for status displays.
#[derive(Parser, Debug)]
#[command(name = "display-auth", version, about)]
struct Cli {
    /// Config file (default: ~/.display-auth/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Device-side credential operations
    Device {
        #[command(subcommand)]
        command: DeviceCommands,
    },
    /// Issue or verify bearer tokens
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },
    /// Manage the server-side device registry
    Registry {
        #[command(subcommand)]
        command: RegistryCommands,
    },
    /// Run the HTTP gateway
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
}

#[derive(Subcommand, Debug)]
enum DeviceCommands {
    /// Load or generate the device secret and print the registration details
    Provision,
    /// Sign a request body and print the authentication headers
    Sign {
        /// Request body (default: empty)
        #[arg(long, conflicts_with = "body_file")]
        body: Option<String>,
        /// Read the request body from a file
        #[arg(long)]
        body_file: Option<PathBuf>,
        /// Sign at this unix timestamp instead of now
        #[arg(long)]
        timestamp: Option<u64>,
    },
    /// Erase the device secret
    Reset {
        /// Required; reset is irreversible
        #[arg(long)]
        yes: bool,
    },
    /// Show the device identity (provisions on first use)
    Info,
}

#[derive(Subcommand, Debug)]
enum TokenCommands {
    /// Issue a token for a registered device
    Issue {
        #[arg(long)]
        serial: String,
        /// Issue a companion-app token instead of a device token
        #[arg(long)]
        app: bool,
    },
    /// Verify a token and print its claims
    Verify {
        token: String,
        #[arg(long)]
        app: bool,
    },
}

#[derive(Subcommand, Debug)]
enum RegistryCommands {
    /// Register (or update) a device
    Add {
        #[arg(long)]
        serial: String,
        /// 64-char hex key hash printed by `device provision`
        #[arg(long)]
        key_hash: String,
        #[arg(long)]
        pairing_code: Option<String>,
        /// active | pending_approval | disabled | blacklisted | deleted
        #[arg(long, default_value = "active")]
        status: String,
    },
    /// Show a registered device
    Show {
        #[arg(long)]
        serial: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Device { command } => run_device(&config, command),
        Commands::Token { command } => run_token(&config, command),
        Commands::Registry { command } => run_registry(&config, command),
        Commands::Serve { host, port } => {
            let mut config = config;
            if let Some(host) = host {
                config.gateway.host = host;
            }
            if let Some(port) = port {
                config.gateway.port = port;
            }
            // Remote key fetch is blocking; resolve before starting the runtime
            let key = Arc::new(config.signing_key()?);
            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?
                .block_on(display_auth::gateway::run_gateway(config, key))
        }
    }
}

// ── Device ──────────────────────────────────────────────────────

fn open_credentials(config: &Config) -> Result<CredentialStore> {
    let hardware: Arc<dyn HardwareIdentity> = match config.device_mac()? {
        Some(mac) => Arc::new(StaticHardware::new(mac)),
        None => Arc::new(HostHardware),
    };
    let store = Arc::new(FileSecretStore::new(&config.secret_dir()));
    Ok(CredentialStore::new(store, hardware))
}

fn run_device(config: &Config, command: DeviceCommands) -> Result<()> {
    let mut credentials = open_credentials(config)?;

    match command {
        DeviceCommands::Provision => {
            credentials.begin().context("Device provisioning failed")?;
            println!("serial_number: {}", credentials.serial_number());
            println!("device_id:     {}", credentials.device_id());
            println!(
                "key_hash:      {}",
                credentials.key_hash().unwrap_or_default()
            );
        }
        DeviceCommands::Sign {
            body,
            body_file,
            timestamp,
        } => {
            credentials.begin().context("Device provisioning failed")?;
            let body = match (body, body_file) {
                (Some(b), _) => b.into_bytes(),
                (None, Some(path)) => std::fs::read(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                (None, None) => Vec::new(),
            };

            let signer = RequestSigner::new(&credentials);
            let request = match timestamp {
                Some(ts) => display_auth::protocol::SignedRequest {
                    serial: credentials.serial_number().to_string(),
                    timestamp: ts,
                    body_hash: display_auth::crypto::sha256_hex(&body),
                    signature: signer.sign(ts, &body)?,
                },
                None => signer.sign_now(&body)?,
            };
            for (name, value) in request.headers() {
                println!("{name}: {value}");
            }
        }
        DeviceCommands::Reset { yes } => {
            if !yes {
                anyhow::bail!("Refusing to reset without --yes");
            }
            credentials.reset()?;
            println!("Device credentials erased");
        }
        DeviceCommands::Info => {
            credentials.begin().context("Failed to load device credentials")?;
            let key_hash = credentials.key_hash().unwrap_or_default();
            println!("serial_number: {}", credentials.serial_number());
            println!("device_id:     {}", credentials.device_id());
            println!("status:        {:?}", credentials.status());
            println!("key_hash:      {}…", &key_hash[..key_hash.len().min(16)]);
        }
    }
    Ok(())
}

// ── Tokens ──────────────────────────────────────────────────────

fn open_registry(config: &Config) -> Result<SqliteDeviceRegistry> {
    let path = config.registry_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    SqliteDeviceRegistry::open(&path)
        .with_context(|| format!("Failed to open device registry {}", path.display()))
}

fn run_token(config: &Config, command: TokenCommands) -> Result<()> {
    match command {
        TokenCommands::Issue { serial, app } => {
            let registry = open_registry(config)?;
            let device = registry
                .find_by_serial(&serial)?
                .ok_or_else(|| anyhow::anyhow!("Device {serial} is not registered"))?;

            let policy = TokenPolicy {
                device_ttl_secs: config.tokens.device_ttl_secs,
                app_ttl_secs: config.tokens.app_ttl_secs,
                identity_key: config.tokens.identity_key,
            };
            let mut issuer = TokenIssuer::new(Arc::new(config.signing_key()?), policy);
            if let Some(secret) = config.app_secret() {
                issuer = issuer.with_app_secret(secret);
            }

            let issued = if app {
                issuer.issue_app_token(&device)?
            } else {
                issuer.issue_device_token(&device)?
            };
            println!(
                "{}",
                serde_json::json!({
                    "token": issued.token,
                    "issued_at": issued.issued_at,
                    "expires_at": issued.expires_at_rfc3339(),
                })
            );
        }
        TokenCommands::Verify { token, app } => {
            let claims = if app {
                let secret = config
                    .app_secret()
                    .ok_or(display_auth::ConfigError::MissingAppSecret)?;
                let verifier =
                    TokenVerifier::new(Arc::new(SigningKey::hmac(secret.as_bytes(), None)));
                serde_json::to_value(verifier.verify::<AppClaims>(&token, APP_TOKEN_TYPE)?)?
            } else {
                let verifier = TokenVerifier::new(Arc::new(config.signing_key()?));
                serde_json::to_value(verifier.verify::<DeviceClaims>(
                    &token,
                    display_auth::protocol::DEVICE_TOKEN_TYPE,
                )?)?
            };
            println!("{}", serde_json::to_string_pretty(&claims)?);
        }
    }
    Ok(())
}

// ── Registry ────────────────────────────────────────────────────

fn run_registry(config: &Config, command: RegistryCommands) -> Result<()> {
    let registry = open_registry(config)?;

    match command {
        RegistryCommands::Add {
            serial,
            key_hash,
            pairing_code,
            status,
        } => {
            let serial = serial.trim().to_ascii_uppercase();
            if serial.len() != 8 || !serial.chars().all(|c| c.is_ascii_hexdigit()) {
                anyhow::bail!("Serial must be 8 hex characters");
            }
            if key_hash.len() != 64 || !key_hash.chars().all(|c| c.is_ascii_hexdigit()) {
                anyhow::bail!("Key hash must be 64 hex characters");
            }
            let status = DeviceStatus::parse(&status)
                .ok_or_else(|| anyhow::anyhow!("Unknown device status: {status}"))?;

            // Keep identity keys stable across re-registration
            let mut record = match registry.find_by_serial(&serial)? {
                Some(existing) => DeviceRecord {
                    key_hash: key_hash.to_ascii_lowercase(),
                    ..existing
                },
                None => DeviceRecord::new(&serial, &key_hash),
            };
            record.status = status;
            if let Some(code) = pairing_code {
                record.pairing_code = Some(code.trim().to_ascii_uppercase());
            }

            registry.upsert(&record)?;
            println!("Registered {} as {}", record.serial_number, record.device_uuid);
        }
        RegistryCommands::Show { serial } => {
            let Some(device) = registry.find_by_serial(&serial.to_ascii_uppercase())? else {
                anyhow::bail!("Device {serial} is not registered");
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "serial_number": device.serial_number,
                    "device_id": device.device_id,
                    "device_uuid": device.device_uuid,
                    "pairing_code": device.pairing_code,
                    "user_uuid": device.user_uuid,
                    "status": device.status.as_str(),
                    "replay_floor": device.replay_floor,
                    "debug_enabled": device.debug_enabled,
                    "target_firmware_version": device.target_firmware_version,
                    "key_hash_prefix": &device.key_hash[..device.key_hash.len().min(16)],
                }))?
            );
        }
    }
    Ok(())
}
