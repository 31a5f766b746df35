use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use crm_mesh::{CredentialMint, MeshDialer, MeshTls};
use crm_proto::UserToEnroll;
use zeroize::Zeroizing;

mod client;
mod commands;

use commands::{cmd_enroll, cmd_login, cmd_register_company, parse_user, CompanyArgs};

// ────────────────────────────────────── CLI Types ──────────────────────────────────────

#[derive(Parser)]
#[command(name = "crm")]
#[command(about = "CRM core services client")]
struct Cli {
    /// Mesh routing endpoint (https only)
    #[arg(long, env = "MESH_ENDPOINT")]
    endpoint: String,

    /// CA certificate the mesh peers are pinned to
    #[arg(long, env = "MESH_CA_CERT")]
    ca_cert: PathBuf,

    /// Client certificate presented to the mesh
    #[arg(long, env = "MESH_CLIENT_CERT")]
    client_cert: PathBuf,

    /// Private key of the client certificate
    #[arg(long, env = "MESH_CLIENT_KEY")]
    client_key: PathBuf,

    /// PKCS#8 PEM key used to mint bearer tokens
    #[arg(long, env = "MESH_SIGNING_KEY")]
    signing_key: PathBuf,

    #[arg(long, env = "MESH_SIGNING_KEY_PASSPHRASE", hide_env_values = true)]
    signing_key_passphrase: Option<String>,

    /// Per-call timeout in seconds
    #[arg(long, env = "CRM_CALL_TIMEOUT_SECS", default_value_t = 10)]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register a company with its tenant database and administrator
    RegisterCompany {
        name: String,
        address: String,
        #[arg(long, default_value = "")]
        email: String,
        #[arg(long, default_value = "")]
        phone: String,
        #[arg(long, env = "CRM_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Enroll users into an existing company
    Enroll {
        company_id: String,
        db_name: String,
        /// EMAIL,PHONE,ROLE_ID (repeatable; leave PHONE or EMAIL empty)
        #[arg(long = "user", required = true, value_parser = parse_user)]
        users: Vec<UserToEnroll>,
    },
    /// Resolve credentials to a tenant database
    Login {
        #[arg(long, default_value = "")]
        email: String,
        #[arg(long, default_value = "")]
        phone: String,
        #[arg(long, env = "CRM_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

fn dialer(cli: &Cli) -> Result<MeshDialer, Box<dyn std::error::Error>> {
    let tls = MeshTls::from_files(&cli.ca_cert, &cli.client_cert, &cli.client_key)?;
    let pem = Zeroizing::new(std::fs::read_to_string(&cli.signing_key)?);
    let mint = match &cli.signing_key_passphrase {
        Some(passphrase) => CredentialMint::from_encrypted_pem(&pem, passphrase.as_bytes())?,
        None => CredentialMint::from_pem(&pem)?,
    };
    Ok(MeshDialer::new(cli.endpoint.clone(), &tls, Arc::new(mint))
        .with_timeout(Duration::from_secs(cli.timeout)))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let dialer = dialer(&cli)?;
    tracing::debug!(endpoint = dialer.endpoint(), "mesh dialer ready");

    let output = match cli.command {
        Command::RegisterCompany {
            name,
            address,
            email,
            phone,
            password,
        } => {
            let mut client = dialer.provisioning().await?;
            let args = CompanyArgs {
                name,
                address,
                email,
                phone,
                password: Zeroizing::new(password),
            };
            cmd_register_company(&mut client, args).await?
        }
        Command::Enroll {
            company_id,
            db_name,
            users,
        } => {
            let mut client = dialer.enrollment().await?;
            cmd_enroll(&mut client, company_id, db_name, users).await?
        }
        Command::Login {
            email,
            phone,
            password,
        } => {
            let mut client = dialer.login().await?;
            cmd_login(&mut client, email, phone, Zeroizing::new(password)).await?
        }
    };
    println!("{output}");

    Ok(())
}
