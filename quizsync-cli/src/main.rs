use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use quizsync_core::transfer::{self, ExportKind};
use quizsync_core::validation::{integrity_issues, validate_test};
use quizsync_core::{checksum, FileKvStore, UserData};
use quizsync_sync::{
    Credentials, FileGateway, RemoteGateway, Resolution, Synchronizer, SynchronizerBuilder,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod table;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    /// Table format (default)
    Table,
    /// Pretty JSON
    Json,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Side {
    /// Keep the data on this device and overwrite the cloud copy
    Local,
    /// Keep the cloud copy and discard the data on this device
    Remote,
}

impl From<Side> for Resolution {
    fn from(side: Side) -> Self {
        match side {
            Side::Local => Resolution::KeepLocal,
            Side::Remote => Resolution::KeepRemote,
        }
    }
}

#[derive(Parser)]
#[command(name = "quizsync")]
#[command(about = "QuizSync local-first data CLI", long_about = None)]
struct Cli {
    /// Directory holding this device's data (defaults to the platform data dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Remote directory shared between devices; local-only when omitted
    #[arg(long, global = true)]
    remote: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the checksum of the current document or of a JSON file
    Checksum {
        /// Document file; the current document when omitted
        file: Option<PathBuf>,
    },
    /// Show per-subject counts
    Summary {
        /// Output format (table, json)
        #[arg(short, long, value_enum, default_value = "table")]
        output: OutputFormat,
    },
    /// Check every test and audit document integrity
    Validate,
    /// Export the document, or one test, as JSON
    Export {
        /// Export only this test
        #[arg(long)]
        test: Option<String>,
        /// Directory to write into
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },
    /// Import an exported document and merge it into the current one
    Import {
        /// Exported document file
        file: PathBuf,
    },
    /// Import a single test into a subject
    ImportTest {
        /// Test file
        file: PathBuf,
        /// Subject id to attach the test to
        #[arg(short, long)]
        subject: String,
    },
    /// Create an account and sync this device's data to it
    SignUp {
        email: String,
        password: String,
        /// Display name for the profile
        #[arg(long)]
        name: Option<String>,
    },
    /// Sign in to an existing account
    SignIn { email: String, password: String },
    /// Upload the current document now
    Sync,
    /// Resolve a pending conflict by keeping one side
    Resolve {
        #[arg(value_enum)]
        keep: Side,
    },
    /// Show sync status
    Status {
        /// Output format (table, json)
        #[arg(short, long, value_enum, default_value = "table")]
        output: OutputFormat,
    },
    /// Sign out and clear this device's data
    SignOut,
}

struct Session {
    sync: Synchronizer,
    gateway: Arc<FileGateway>,
}

impl Session {
    /// Open the device store, restore any remote session, and run the
    /// initial sync to completion.
    async fn open(cli: &Cli) -> Result<Self> {
        let data_dir = match &cli.data_dir {
            Some(dir) => dir.clone(),
            None => dirs::data_dir()
                .map(|d| d.join("quizsync"))
                .context("No platform data directory; pass --data-dir")?,
        };
        let store = FileKvStore::open(&data_dir)
            .with_context(|| format!("Failed to open data directory {}", data_dir.display()))?;
        let gateway = Arc::new(FileGateway::new(cli.remote.clone().unwrap_or_default()));

        let sync = SynchronizerBuilder::new()
            .with_gateway(gateway.clone())
            .with_store(Arc::new(store))
            .build()
            .context("Failed to build synchronizer")?;
        sync.start().context("Failed to load local data")?;

        if gateway.is_configured() {
            if let Err(e) = gateway.initialize().await {
                tracing::warn!(error = %e, "remote unavailable, continuing local-only");
            }
        }
        sync.handle_auth_change(gateway.auth_state()).await;

        Ok(Self { sync, gateway })
    }

    fn require_remote(&self) -> Result<()> {
        if !self.gateway.is_configured() {
            bail!("No remote configured; pass --remote <DIR>");
        }
        Ok(())
    }

    fn report_conflict(&self) {
        if let Some(summary) = self.sync.conflict_summary() {
            println!("Local and cloud data differ:");
            println!("{}", table::format_conflict_table(&summary));
            println!("Run 'quizsync resolve local' or 'quizsync resolve remote'.");
        }
    }
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Checksum { file: Some(file) } => {
            let data: UserData =
                serde_json::from_str(&read_file(file)?).context("Invalid document JSON")?;
            println!("{}", checksum(&data)?);
        }

        Commands::Checksum { file: None } => {
            let session = Session::open(&cli).await?;
            println!("{}", checksum(&session.sync.data())?);
        }

        Commands::Summary { output } => {
            let session = Session::open(&cli).await?;
            let data = session.sync.data();
            match output {
                OutputFormat::Table => println!("{}", table::format_summary_table(&data)),
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&data.summary())?)
                }
            }
            session.report_conflict();
        }

        Commands::Validate => {
            let session = Session::open(&cli).await?;
            let data = session.sync.data();
            let mut problems = 0;

            for test in &data.tests {
                if let Err(e) = validate_test(test) {
                    println!("✗ {} ({}): {}", test.title, test.id, e);
                    problems += 1;
                }
            }
            for issue in integrity_issues(&data) {
                println!("✗ {:?}", issue);
                problems += 1;
            }

            if problems > 0 {
                bail!("{} problem(s) found", problems);
            }
            println!("✓ {} test(s) valid, no integrity issues", data.tests.len());
        }

        Commands::Export { test, out } => {
            let session = Session::open(&cli).await?;
            let data = session.sync.data();
            let today = chrono::Local::now().date_naive();

            let (name, content) = match test {
                Some(id) => {
                    let test = data
                        .test(id)
                        .with_context(|| format!("No test with id {}", id))?;
                    (
                        transfer::export_file_name(ExportKind::Test(&test.title), today),
                        transfer::export_test(test)?,
                    )
                }
                None => (
                    transfer::export_file_name(ExportKind::UserData, today),
                    transfer::export_user_data(&data)?,
                ),
            };

            let path = out.join(name);
            std::fs::write(&path, content)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("✓ Exported to {}", path.display());
        }

        Commands::Import { file } => {
            let incoming =
                transfer::import_user_data(&read_file(file)?).context("Import rejected")?;
            let summary = incoming.summary();

            let session = Session::open(&cli).await?;
            session.sync.mutate(|data| data.merge(incoming))?;
            if session.sync.is_signed_in() {
                session.sync.request_sync().await.context("Upload failed")?;
            }
            println!(
                "✓ Imported {} subject(s), {} test(s), {} result(s)",
                summary.subjects, summary.tests, summary.results
            );
        }

        Commands::ImportTest { file, subject } => {
            let session = Session::open(&cli).await?;
            if session.sync.with_data(|d| d.subject(subject).is_none()) {
                bail!("No subject with id {}", subject);
            }

            let test = transfer::import_test(&read_file(file)?, subject).context("Import rejected")?;
            validate_test(&test).context("Imported test is invalid")?;
            let title = test.title.clone();
            let questions = test.questions.len();

            session.sync.mutate(|data| data.upsert_test(test))?;
            if session.sync.is_signed_in() {
                session.sync.request_sync().await.context("Upload failed")?;
            }
            println!("✓ Imported '{}' with {} question(s)", title, questions);
        }

        Commands::SignUp {
            email,
            password,
            name,
        } => {
            let session = Session::open(&cli).await?;
            session.require_remote()?;
            let user = session
                .sync
                .sign_up(&Credentials::new(email, password))
                .await
                .context("Sign-up failed")?;
            if let Some(name) = name {
                session.sync.update_profile(name).await?;
            }
            println!("✓ Signed up as {}", user.email);
            session.report_conflict();
        }

        Commands::SignIn { email, password } => {
            let session = Session::open(&cli).await?;
            session.require_remote()?;
            let user = session
                .sync
                .sign_in(&Credentials::new(email, password))
                .await
                .context("Sign-in failed")?;
            println!("✓ Signed in as {}", user.email);
            session.report_conflict();
        }

        Commands::Sync => {
            let session = Session::open(&cli).await?;
            session.require_remote()?;
            if !session.sync.is_signed_in() {
                bail!("Not signed in");
            }
            if session.sync.has_conflict() {
                session.report_conflict();
            } else if session.sync.request_sync().await.context("Upload failed")? {
                println!("✓ Synced");
            } else {
                println!("Nothing to sync right now");
            }
        }

        Commands::Resolve { keep } => {
            let session = Session::open(&cli).await?;
            session.require_remote()?;
            if session.sync.resolve((*keep).into()).await? {
                println!("✓ Conflict resolved");
            } else {
                println!("No conflict pending");
            }
        }

        Commands::Status { output } => {
            let session = Session::open(&cli).await?;
            let status = session.sync.status();
            match output {
                OutputFormat::Table => println!("{}", table::format_status_table(&status)),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
            }
            session.report_conflict();
        }

        Commands::SignOut => {
            let session = Session::open(&cli).await?;
            if !session.sync.is_signed_in() {
                println!("Not signed in");
                return Ok(());
            }
            session.sync.sign_out().await.context("Sign-out failed")?;
            println!("✓ Signed out; local data cleared");
        }
    }

    Ok(())
}
