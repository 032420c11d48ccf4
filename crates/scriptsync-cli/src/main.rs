//! scriptsync command line
//!
//! Subcommands split into two groups: credential lifecycle (`setup`,
//! `login`, `status`) and project operations (`list`, `pull`, `push`,
//! `run`, `deploy`). Project commands build the same stack every time:
//! credential store, auth session, project client.

mod local;

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use scriptsync_auth::{AppRegistration, AuthSession, CredentialStore, Secret, SessionStatus};
use scriptsync_client::{ExecutionOutcome, ProjectClient};

#[derive(Debug, Parser)]
#[command(name = "scriptsync")]
#[command(about = "Sync, run, and deploy Google Apps Script projects", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Store the OAuth app registration (one-time setup)
    Setup {
        #[arg(long)]
        client_id: String,
        #[arg(long)]
        client_secret: String,
        #[arg(long, default_value = "http://localhost:8787/callback")]
        redirect_uri: String,
        /// Token file location; relative paths resolve against the
        /// credential directory
        #[arg(long, default_value = "tokens.json")]
        token_path: PathBuf,
    },
    /// Print the consent URL and exchange the pasted code for tokens
    Login,
    /// Show registration and session state
    Status,
    /// List script projects
    List {
        #[arg(long, default_value_t = 25)]
        page_size: u32,
        /// Narrow the listing by project title
        #[arg(long)]
        query: Option<String>,
    },
    /// Download a project's files into a local directory
    Pull {
        script_id: String,
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
    /// Replace a project's files with a local directory's contents
    Push {
        script_id: String,
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
    /// Execute a function in a project and print its result
    Run {
        script_id: String,
        function: String,
        /// Arguments as a JSON array, e.g. '["a", 2]'
        #[arg(long, default_value = "[]")]
        params: String,
        /// Run against the saved content instead of the deployed version
        #[arg(long)]
        dev: bool,
    },
    /// Deploy a version of a project
    Deploy {
        script_id: String,
        /// Existing version to deploy; omitting it cuts a new version first
        #[arg(long)]
        version: Option<u32>,
        #[arg(long)]
        description: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => Ok(()),
        Err(e) if needs_login(&e) => {
            eprintln!("error: {e:#}");
            eprintln!("hint: run `scriptsync login` to authorize this machine");
            std::process::exit(2);
        }
        Err(e) => Err(e),
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Setup {
            client_id,
            client_secret,
            redirect_uri,
            token_path,
        } => run_setup(client_id, client_secret, redirect_uri, token_path).await,
        Commands::Login => run_login().await,
        Commands::Status => run_status().await,
        Commands::List { page_size, query } => run_list(page_size, query).await,
        Commands::Pull { script_id, dir } => run_pull(&script_id, dir).await,
        Commands::Push { script_id, dir } => run_push(&script_id, dir).await,
        Commands::Run {
            script_id,
            function,
            params,
            dev,
        } => run_function(&script_id, &function, &params, dev).await,
        Commands::Deploy {
            script_id,
            version,
            description,
        } => run_deploy(&script_id, version, description).await,
    }
}

/// Whether the failure is cured by re-running the interactive flow
/// rather than by retrying the command.
fn needs_login(e: &anyhow::Error) -> bool {
    if let Some(err) = e.downcast_ref::<scriptsync_client::Error>() {
        return err.requires_reauthorization()
            || matches!(
                err,
                scriptsync_client::Error::Auth(scriptsync_auth::Error::Unauthenticated(_))
            );
    }
    if let Some(err) = e.downcast_ref::<scriptsync_auth::Error>() {
        return matches!(
            err,
            scriptsync_auth::Error::ReauthorizationRequired(_)
                | scriptsync_auth::Error::Unauthenticated(_)
        );
    }
    false
}

/// Load the registration and bind the token store it names.
async fn open_session() -> Result<AuthSession> {
    let store = CredentialStore::from_env()?;
    let registration = store
        .load_registration()
        .await
        .context("no app registration found; run `scriptsync setup` first")?;
    let token_path = registration.token_path.clone();
    let store = store.with_token_path(&token_path);
    Ok(AuthSession::new(registration, store, reqwest::Client::new()))
}

fn project_client(session: AuthSession) -> ProjectClient {
    ProjectClient::new(Arc::new(session), reqwest::Client::new())
}

async fn run_setup(
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    token_path: PathBuf,
) -> Result<()> {
    let store = CredentialStore::from_env()?;
    if store.load_registration().await.is_ok() {
        eprintln!(
            "replacing existing registration at {}",
            store.config_path().display()
        );
    }
    let registration = AppRegistration {
        client_id,
        client_secret: Secret::new(client_secret),
        redirect_uri,
        token_path,
    };
    store.save_registration(&registration).await?;
    println!("registration written to {}", store.config_path().display());
    println!("next: run `scriptsync login` to authorize");
    Ok(())
}

async fn run_login() -> Result<()> {
    let session = open_session().await?;
    println!("open this URL in a browser and approve access:");
    println!();
    println!("  {}", session.authorization_url());
    println!();
    print!("paste the authorization code here: ");
    std::io::stdout().flush()?;

    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("reading authorization code from stdin")?;
    let code = line.trim();
    if code.is_empty() {
        bail!("no authorization code provided");
    }

    let record = session.exchange_code(code).await?;
    println!("authorized with {} scope(s)", record.scope.len());
    if let SessionStatus::Authorized { remaining } = session.status().await? {
        println!("access token valid for the next {}s", remaining.as_secs());
    }
    if record.refresh_token.is_none() {
        eprintln!("warning: no refresh token granted; expect to log in again after expiry");
    }
    Ok(())
}

async fn run_status() -> Result<()> {
    let store = CredentialStore::from_env()?;
    let registration = match store.load_registration().await {
        Ok(r) => r,
        Err(scriptsync_auth::Error::ConfigMissing(path)) => {
            println!("not configured: no registration at {}", path.display());
            println!("run `scriptsync setup` to create one");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    println!(
        "registration: client {} ({})",
        registration.client_id,
        store.config_path().display()
    );

    let token_path = registration.token_path.clone();
    let store = store.with_token_path(&token_path);
    let session = AuthSession::new(registration, store, reqwest::Client::new());
    match session.status().await? {
        SessionStatus::AwaitingAuthorization => {
            println!("session: not authorized yet; run `scriptsync login`");
        }
        SessionStatus::Authorized { remaining } => {
            println!(
                "session: authorized, access token valid for another {}s",
                remaining.as_secs()
            );
        }
        SessionStatus::Expired { refreshable: true } => {
            println!("session: access token expired; it will refresh on next use");
        }
        SessionStatus::Expired { refreshable: false } => {
            println!("session: expired with no refresh token; run `scriptsync login`");
        }
    }
    Ok(())
}

async fn run_list(page_size: u32, query: Option<String>) -> Result<()> {
    let client = project_client(open_session().await?);
    let mut page_token: Option<String> = None;
    let mut total = 0usize;
    loop {
        let page = client
            .list_projects(page_size, page_token.as_deref(), query.as_deref())
            .await?;
        for project in &page.projects {
            match &project.updated_at {
                Some(updated) => {
                    println!("{}  {}  (updated {updated})", project.script_id, project.title);
                }
                None => println!("{}  {}", project.script_id, project.title),
            }
        }
        total += page.projects.len();
        page_token = page.next_page_token;
        if page_token.is_none() {
            break;
        }
    }
    println!("{total} project(s)");
    Ok(())
}

async fn run_pull(script_id: &str, dir: PathBuf) -> Result<()> {
    let client = project_client(open_session().await?);
    let snapshot = client.get_project(script_id).await?;
    let written = local::write_project(&dir, &snapshot.files).await?;
    for name in &written {
        println!("  {name}");
    }
    println!(
        "pulled {} file(s) from \"{}\" into {}",
        written.len(),
        snapshot.title,
        dir.display()
    );
    Ok(())
}

async fn run_push(script_id: &str, dir: PathBuf) -> Result<()> {
    let files = local::read_project(&dir).await?;
    if files.is_empty() {
        bail!("no project files found in {}", dir.display());
    }
    let count = files.len();
    let client = project_client(open_session().await?);
    let snapshot = client.update_project(script_id, files).await?;
    println!(
        "pushed {count} file(s); \"{}\" now holds {}",
        snapshot.title,
        snapshot.files.len()
    );
    Ok(())
}

async fn run_function(script_id: &str, function: &str, params: &str, dev: bool) -> Result<()> {
    let parameters: Vec<serde_json::Value> =
        serde_json::from_str(params).context("--params must be a JSON array")?;

    let client = project_client(open_session().await?);
    match client
        .run_function(script_id, function, parameters, dev)
        .await?
    {
        ExecutionOutcome::Completed { return_value } => {
            match return_value {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => println!("{function} completed with no return value"),
            }
            Ok(())
        }
        ExecutionOutcome::Failed {
            code,
            message,
            details,
        } => {
            eprintln!("remote execution failed (code {code}): {message}");
            for detail in &details {
                eprintln!("  {}", serde_json::to_string(detail)?);
            }
            std::process::exit(1);
        }
    }
}

async fn run_deploy(
    script_id: &str,
    version: Option<u32>,
    description: Option<String>,
) -> Result<()> {
    let client = project_client(open_session().await?);
    let deployment = client
        .create_deployment(script_id, version, description.as_deref(), None)
        .await?;
    let deployed_version = deployment
        .deployment_config
        .as_ref()
        .and_then(|c| c.version_number);
    match deployed_version {
        Some(v) => println!("deployment {} at version {v}", deployment.deployment_id),
        None => println!("deployment {}", deployment.deployment_id),
    }
    Ok(())
}
