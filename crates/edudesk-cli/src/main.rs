//! edudesk: protected classroom file storage CLI
//!
//! Commands:
//!   create-admin                     - register the administrator login
//!   create-submission <input> ...    - protect a student submission and record it
//!   attach-material <input> ...      - protect instructor material and record it
//!   reveal <file_id> --out <path>    - decrypt a protected file
//!   login                            - check a login/password pair
//!   deactivate <login>               - disable a login without deleting it
//!   gen-verifier                     - print stored-verifier columns for a password
//!   config show                      - display the effective configuration

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use secrecy::{ExposeSecret, SecretString};
use tracing::{error, info};

use edudesk_core::{BlobArea, EdudeskConfig, EdudeskError, PasswordScheme, Role};
use edudesk_crypto::password::{derive, validate_rules};
use edudesk_vault::{
    Authenticator, FileVault, JsonRecordStore, ProtectRequest, ProtectedFile, SubmissionStore,
};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "edudesk",
    version,
    about = "EduDesk protected file storage",
    long_about = "edudesk: protect submissions and assignment material at rest, and manage the logins that own them"
)]
struct Cli {
    /// Path to edudesk.toml (a .json path is read as the original config.json)
    #[arg(long, short = 'c', env = "EDUDESK_CONFIG", default_value = "config/edudesk.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides [log] level
    #[arg(long, env = "EDUDESK_LOG")]
    log: Option<String>,

    /// Log format; overrides [log] format
    #[arg(long, env = "EDUDESK_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register an administrator login (password prompted twice)
    CreateAdmin {
        #[arg(long, default_value = "admin")]
        login: String,
    },

    /// Protect a student's submission and record it against an assignment
    CreateSubmission {
        /// Plaintext file to protect
        input: PathBuf,
        student_id: i64,
        assignment_id: i64,
        /// Name to record (default: the input's file name)
        original_name: Option<String>,
    },

    /// Protect instructor material and attach it to an assignment
    AttachMaterial {
        /// Plaintext file to protect
        input: PathBuf,
        teacher_id: i64,
        assignment_id: i64,
        /// Name to record (default: the input's file name)
        original_name: Option<String>,
    },

    /// Decrypt a protected file to a path
    Reveal {
        /// 32-character hex file id
        file_id: String,
        /// Destination of the plaintext
        #[arg(long, short = 'o')]
        out: PathBuf,
        /// Look in assignment material instead of submissions
        #[arg(long)]
        material: bool,
    },

    /// Check a login and password, print the principal
    Login {
        #[arg(long, default_value = "admin")]
        login: String,
    },

    /// Deactivate a login (records are kept)
    Deactivate { login: String },

    /// Print verifier columns for a password (for seeding an external store)
    GenVerifier {
        /// Verifier scheme (default: [auth] scheme)
        #[arg(long)]
        scheme: Option<SchemeArg>,
        /// PBKDF2 iteration count (default: [crypto] pbkdf2_iterations)
        #[arg(long)]
        iterations: Option<u32>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration with the master key redacted
    Show,
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
enum SchemeArg {
    Argon2id,
    Pbkdf2,
}

impl From<SchemeArg> for PasswordScheme {
    fn from(arg: SchemeArg) -> Self {
        match arg {
            SchemeArg::Argon2id => PasswordScheme::Argon2id,
            SchemeArg::Pbkdf2 => PasswordScheme::Pbkdf2,
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(cause) = fatal_cause(&e) {
                error!(category = %cause.category(), "fatal: {cause}");
            }
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// The first `EdudeskError` in the chain, if it is one the process must not retry.
fn fatal_cause(err: &anyhow::Error) -> Option<&EdudeskError> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<EdudeskError>())
        .filter(|cause| cause.is_fatal())
}

fn run(cli: Cli) -> Result<()> {
    // gen-verifier works without a config file, everything else needs one.
    let config = match &cli.command {
        Commands::GenVerifier { .. } if !cli.config.exists() => EdudeskConfig::default(),
        _ => load_config(&cli.config, cli.log.as_deref())?,
    };

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = cli.log_format.unwrap_or(if config.log.format == "json" {
        LogFormat::Json
    } else {
        LogFormat::Text
    });
    init_logging(&level, format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "edudesk starting"
    );

    match cli.command {
        Commands::CreateAdmin { login } => cmd_create_admin(&config, &login),
        Commands::CreateSubmission {
            input,
            student_id,
            assignment_id,
            original_name,
        } => cmd_create_submission(&config, &input, student_id, assignment_id, original_name),
        Commands::AttachMaterial {
            input,
            teacher_id,
            assignment_id,
            original_name,
        } => cmd_attach_material(&config, &input, teacher_id, assignment_id, original_name),
        Commands::Reveal {
            file_id,
            out,
            material,
        } => cmd_reveal(&config, &file_id, &out, material),
        Commands::Login { login } => cmd_login(&config, &login),
        Commands::Deactivate { login } => cmd_deactivate(&config, &login),
        Commands::GenVerifier { scheme, iterations } => {
            cmd_gen_verifier(&config, scheme.map(PasswordScheme::from), iterations)
        }
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config),
    }
}

// ── Config + logging ──────────────────────────────────────────────────────────

/// Load the config with a short-lived stderr subscriber so warnings raised
/// while parsing are not lost before logging is set up.
fn load_config(path: &Path, log: Option<&str>) -> Result<EdudeskConfig> {
    let bootstrap = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::new(log.unwrap_or("warn")))
        .finish();
    tracing::subscriber::with_default(bootstrap, || EdudeskConfig::load(path))
        .with_context(|| format!("loading config: {}", path.display()))
}

fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn open_store(config: &EdudeskConfig) -> Result<JsonRecordStore> {
    let path = config.storage.records_path();
    JsonRecordStore::open(&path).with_context(|| format!("opening record store: {}", path.display()))
}

fn open_vault(config: &EdudeskConfig) -> Result<FileVault> {
    FileVault::from_config(config).context("building file vault")
}

fn authenticator(config: &EdudeskConfig) -> Result<Authenticator<JsonRecordStore>> {
    Authenticator::from_config(open_store(config)?, config).context("initializing authenticator")
}

// ── Password prompts ──────────────────────────────────────────────────────────

fn prompt_password(prompt: &str) -> Result<SecretString> {
    let entered = rpassword::prompt_password(prompt).context("reading password")?;
    Ok(SecretString::from(entered))
}

/// Prompt twice; the entries must match.
fn prompt_new_password() -> Result<SecretString> {
    let first = prompt_password("New password: ")?;
    let second = prompt_password("Repeat password: ")?;
    if first.expose_secret() != second.expose_secret() {
        bail!("passwords do not match");
    }
    Ok(first)
}

// ── `edudesk create-admin` ────────────────────────────────────────────────────

fn cmd_create_admin(config: &EdudeskConfig, login: &str) -> Result<()> {
    let mut auth = authenticator(config)?;
    let password = prompt_new_password()?;
    let principal = auth
        .register(login, Role::Admin, &password)
        .with_context(|| format!("registering {login}"))?;
    println!("created {} (id {})", principal.login, principal.id);
    Ok(())
}

// ── `edudesk create-submission` / `attach-material` ───────────────────────────

fn cmd_create_submission(
    config: &EdudeskConfig,
    input: &Path,
    student_id: i64,
    assignment_id: i64,
    original_name: Option<String>,
) -> Result<()> {
    let vault = open_vault(config)?;
    let mut store = open_store(config)?;
    let request = request_for(input, student_id, BlobArea::Submission, original_name);

    let (protected, record) = vault
        .protect_and_record(&request, |p| {
            store.insert_submission(assignment_id, student_id, &p.stored_name, &p.original_name)
        })
        .with_context(|| format!("protecting {}", input.display()))?;

    report_protected(&protected);
    info!(submission_id = record.id, assignment_id, "submission recorded");
    Ok(())
}

fn cmd_attach_material(
    config: &EdudeskConfig,
    input: &Path,
    teacher_id: i64,
    assignment_id: i64,
    original_name: Option<String>,
) -> Result<()> {
    let vault = open_vault(config)?;
    let mut store = open_store(config)?;
    let request = request_for(input, teacher_id, BlobArea::Material, original_name);

    let (protected, record) = vault
        .protect_and_record(&request, |p| {
            store.insert_material(assignment_id, teacher_id, &p.stored_name, &p.original_name)
        })
        .with_context(|| format!("protecting {}", input.display()))?;

    report_protected(&protected);
    info!(material_id = record.id, assignment_id, "material recorded");
    Ok(())
}

fn request_for(
    input: &Path,
    owner_id: i64,
    area: BlobArea,
    original_name: Option<String>,
) -> ProtectRequest {
    let request = ProtectRequest::new(input, owner_id, area);
    match original_name {
        Some(name) => request.with_original_name(name),
        None => request,
    }
}

fn report_protected(protected: &ProtectedFile) {
    println!("{}", protected.file_id);
    eprintln!(
        "protected {} ({} bytes) as {}/{}",
        protected.original_name,
        protected.plaintext_len,
        protected.area.dir_name(),
        protected.stored_name
    );
}

// ── `edudesk reveal` ──────────────────────────────────────────────────────────

fn cmd_reveal(config: &EdudeskConfig, file_id: &str, out: &Path, material: bool) -> Result<()> {
    let vault = open_vault(config)?;
    let area = if material {
        BlobArea::Material
    } else {
        BlobArea::Submission
    };

    let revealed = vault
        .reveal_to(area, file_id, out)
        .with_context(|| format!("revealing {file_id}"))?;
    println!(
        "{} -> {} ({} bytes)",
        revealed.original_name,
        revealed.path.display(),
        revealed.bytes
    );
    Ok(())
}

// ── `edudesk login` / `deactivate` ────────────────────────────────────────────

fn cmd_login(config: &EdudeskConfig, login: &str) -> Result<()> {
    let auth = authenticator(config)?;
    let password = prompt_password("Password: ")?;
    let principal = auth.require(login, &password)?;
    println!("id={} role={}", principal.id, principal.role);
    Ok(())
}

fn cmd_deactivate(config: &EdudeskConfig, login: &str) -> Result<()> {
    let mut auth = authenticator(config)?;
    if !auth.deactivate(login)? {
        return Err(EdudeskError::Validation(format!("no such login: {login}")).into());
    }
    println!("deactivated {login}");
    Ok(())
}

// ── `edudesk gen-verifier` ────────────────────────────────────────────────────

fn cmd_gen_verifier(
    config: &EdudeskConfig,
    scheme: Option<PasswordScheme>,
    iterations: Option<u32>,
) -> Result<()> {
    let scheme = scheme.unwrap_or(config.auth.scheme);
    let iterations = iterations.unwrap_or(config.crypto.pbkdf2_iterations);

    let password = prompt_new_password()?;
    validate_rules(password.expose_secret()).map_err(EdudeskError::WeakPassword)?;

    let verifier = derive(&password, scheme, iterations)?;
    let (hash, salt, iterations) = verifier.to_columns();
    if let Some(salt) = salt {
        println!("salt={salt}");
    }
    println!("hash={hash}");
    if let Some(iterations) = iterations {
        println!("iterations={iterations}");
    }
    Ok(())
}

// ── `edudesk config show` ─────────────────────────────────────────────────────

fn cmd_config_show(config: &EdudeskConfig, config_path: &Path) -> Result<()> {
    println!("# Configuration from: {}", config_path.display());
    let key_state = if config.crypto.master_key_hex().is_ok() {
        "[REDACTED]"
    } else {
        "(not set)"
    };
    println!("# crypto.master_key_hex = {key_state}");
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_create_submission() {
        let cli = Cli::try_parse_from([
            "edudesk",
            "--config",
            "site.toml",
            "create-submission",
            "essay.pdf",
            "42",
            "7",
            "Final Essay.pdf",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("site.toml"));
        match cli.command {
            Commands::CreateSubmission {
                input,
                student_id,
                assignment_id,
                original_name,
            } => {
                assert_eq!(input, PathBuf::from("essay.pdf"));
                assert_eq!(student_id, 42);
                assert_eq!(assignment_id, 7);
                assert_eq!(original_name.as_deref(), Some("Final Essay.pdf"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_reveal_material() {
        let cli = Cli::try_parse_from([
            "edudesk",
            "reveal",
            "00112233445566778899aabbccddeeff",
            "--out",
            "out.pdf",
            "--material",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Reveal { material: true, .. }
        ));
    }

    #[test]
    fn parses_gen_verifier_scheme() {
        let cli = Cli::try_parse_from([
            "edudesk",
            "gen-verifier",
            "--scheme",
            "pbkdf2",
            "--iterations",
            "200000",
        ])
        .unwrap();
        match cli.command {
            Commands::GenVerifier { scheme, iterations } => {
                assert_eq!(scheme, Some(SchemeArg::Pbkdf2));
                assert_eq!(iterations, Some(200_000));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_non_numeric_ids() {
        assert!(Cli::try_parse_from(["edudesk", "create-submission", "a.txt", "x", "1"]).is_err());
    }

    #[test]
    fn missing_config_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(&dir.path().join("absent.toml"), None).unwrap_err();
        assert!(format!("{err:#}").contains("config file not found"));
    }

    #[test]
    fn fatal_errors_found_through_context() {
        let missing_key: anyhow::Error =
            EdudeskError::Configuration("crypto.master_key_hex is missing".into()).into();
        let wrapped = missing_key.context("building file vault");
        let cause = fatal_cause(&wrapped).unwrap();
        assert_eq!(cause.category(), edudesk_core::ErrorCategory::Configuration);

        let rng: anyhow::Error = EdudeskError::RandomUnavailable("getrandom".into()).into();
        assert!(fatal_cause(&rng.context("protecting essay.pdf")).is_some());

        let tampered: anyhow::Error = EdudeskError::Integrity("tag mismatch".into()).into();
        assert!(fatal_cause(&tampered.context("revealing ab12")).is_none());
        assert!(fatal_cause(&anyhow::anyhow!("passwords do not match")).is_none());
    }

    #[test]
    fn missing_config_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(&dir.path().join("absent.toml"), None).unwrap_err();
        assert!(fatal_cause(&err).is_some());
    }

    #[test]
    fn request_for_applies_original_name() {
        let req = request_for(Path::new("in.bin"), 3, BlobArea::Material, Some("Notes.pdf".into()));
        assert_eq!(req.original_name.as_deref(), Some("Notes.pdf"));
        assert_eq!(req.owner_id, 3);
    }
}
