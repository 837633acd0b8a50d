//! Admin tool for the customs tracker.
//!
//! Account management talks to the database directly. Every data command
//! runs either against the local database or, with `--remote`, against a
//! running server through the store client.
//!
//! Usage: `tracking-admin [--config config.yml] [--remote] <command>`

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use customs_tracker::{
    client::ApiClient,
    config::Config,
    db::{
        self,
        repositories::{
            SqlxFileRepository, SqlxObjectRepository, SqlxSessionRepository, SqlxUserRepository,
        },
        DynDatabasePool,
    },
    models::{FileUpload, PageRequest},
    services::{
        import::{customs_template, export_customs, tracking_template},
        link::group_by_category,
        AttachmentService, DashboardCard, DashboardService, FileService, ImportOptions,
        ImportReport, ImportService, LinkService, ObjectBackend, ObjectService, Sheet, SyncService,
        UserService,
    },
    store::{
        views::{self, CustomsFilter, DateFilter},
        TrackingStore,
    },
};

#[derive(Debug, Parser)]
#[command(name = "tracking-admin", version, about = "Customs tracker administration")]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = "config.yml")]
    config: PathBuf,

    /// Use the server at `client.endpoint` instead of the local database
    #[arg(long)]
    remote: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create an operator account
    CreateUser {
        username: String,
        #[arg(long)]
        password: String,
    },
    /// Set a new password and revoke the user's sessions
    ResetPassword {
        username: String,
        #[arg(long)]
        password: String,
    },
    /// Log in to the remote server and keep the session
    Login {
        username: String,
        #[arg(long)]
        password: String,
    },
    Logout,
    /// Rebuild the HS code table from tracking records
    SyncHsCodes,
    /// Rebuild the exporter table from tracking records
    SyncExporters,
    /// Import tracking records from a sheet
    ImportTracking {
        file: PathBuf,
        /// Reject rows whose container number already exists
        #[arg(long)]
        skip_duplicates: bool,
        /// Write failed rows, with the reason, to this sheet
        #[arg(long)]
        failed_out: Option<PathBuf>,
    },
    /// Import customs declarations from a sheet (upsert by container number)
    ImportCustoms {
        file: PathBuf,
        #[arg(long)]
        failed_out: Option<PathBuf>,
    },
    /// Export declared records as a customs sheet
    ExportCustoms {
        output: PathBuf,
        #[arg(long, default_value = "")]
        bill_no: String,
        #[arg(long, default_value = "")]
        container_no: String,
        #[arg(long, default_value = "")]
        customs_no: String,
        /// Day or range, e.g. `2024-01-01 to 2024-01-31`
        #[arg(long, default_value = "")]
        arrival: String,
        #[arg(long, default_value = "")]
        declared: String,
    },
    /// Write an empty import template
    Template { kind: TemplateKind, output: PathBuf },
    /// Show dashboard counts, or the records behind one card
    Dashboard {
        #[arg(long)]
        card: Option<CardArg>,
    },
    /// Upload files and attach each to the record its name refers to
    Attach {
        /// Attachment type, e.g. 发票
        #[arg(long)]
        kind: String,
        files: Vec<PathBuf>,
    },
    /// List attachments across records
    Files {
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 20)]
        per_page: u32,
    },
    /// List quick links by category
    Links,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TemplateKind {
    Tracking,
    Customs,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CardArg {
    Quarantine,
    Inspection,
    Unprinted,
    MissingDocuments,
}

impl From<CardArg> for DashboardCard {
    fn from(card: CardArg) -> Self {
        match card {
            CardArg::Quarantine => DashboardCard::QuarantinePending,
            CardArg::Inspection => DashboardCard::InspectionPending,
            CardArg::Unprinted => DashboardCard::UnprintedCheck,
            CardArg::MissingDocuments => DashboardCard::MissingDocuments,
        }
    }
}

/// Local database with the services the commands need
struct Local {
    pool: DynDatabasePool,
    objects: Arc<ObjectService>,
    users: UserService,
}

async fn open_local(config: &Config) -> Result<Local> {
    let pool = db::create_pool(&config.database).await?;
    db::migrations::run_migrations(&pool).await?;

    let files = Arc::new(FileService::new(
        SqlxFileRepository::boxed(pool.clone()),
        config.upload.clone(),
    ));
    let objects = Arc::new(ObjectService::new(
        SqlxObjectRepository::boxed(pool.clone()),
        files,
    ));
    let users = UserService::with_session_expiration(
        SqlxUserRepository::boxed(pool.clone()),
        SqlxSessionRepository::boxed(pool.clone()),
        config.session.expiration_days,
    );
    Ok(Local {
        pool,
        objects,
        users,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "customs_tracker=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load_with_env(&cli.config)?;

    match &cli.command {
        Command::CreateUser { username, password } => {
            let local = open_local(&config).await?;
            let user = local.users.create_user(username, password).await?;
            println!("Created user {} (id {})", user.username, user.id);
            local.pool.close().await;
            return Ok(());
        }
        Command::ResetPassword { username, password } => {
            let local = open_local(&config).await?;
            local.users.reset_password(username, password).await?;
            println!("Password reset for {}", username);
            local.pool.close().await;
            return Ok(());
        }
        Command::Login { username, password } => {
            let client = ApiClient::from_config(&config.client)?;
            let user = client.login(username, password).await?;
            println!(
                "Logged in to {} as {}",
                client.endpoint(),
                user["username"].as_str().unwrap_or(username)
            );
            return Ok(());
        }
        Command::Logout => {
            ApiClient::from_config(&config.client)?.logout().await?;
            println!("Logged out");
            return Ok(());
        }
        Command::Template { kind, output } => {
            let sheet = match kind {
                TemplateKind::Tracking => tracking_template(),
                TemplateKind::Customs => customs_template(),
            };
            sheet.write(output).await?;
            println!("Wrote template to {}", output.display());
            return Ok(());
        }
        _ => {}
    }

    let (backend, pool): (Arc<dyn ObjectBackend>, Option<DynDatabasePool>) = if cli.remote {
        let client = ApiClient::from_config(&config.client)?;
        if client.current_user().await?.is_none() {
            tracing::warn!("Not logged in to {}", client.endpoint());
        }
        (Arc::new(client), None)
    } else {
        let local = open_local(&config).await?;
        (local.objects, Some(local.pool))
    };

    let result = run(cli.command, &config, backend).await;
    if let Some(pool) = pool {
        pool.close().await;
    }
    result
}

async fn run(command: Command, config: &Config, backend: Arc<dyn ObjectBackend>) -> Result<()> {
    match command {
        Command::SyncHsCodes => {
            let report = SyncService::new(backend, config.sync.clone())
                .sync_hs_codes()
                .await?;
            println!(
                "HS codes: {} created, {} updated, {} skipped, {} errors",
                report.created, report.updated, report.skipped, report.errors
            );
        }
        Command::SyncExporters => {
            let report = SyncService::new(backend, config.sync.clone())
                .sync_exporters()
                .await?;
            println!(
                "Exporters: {} created, {} updated, {} skipped, {} errors",
                report.created, report.updated, report.skipped, report.errors
            );
        }
        Command::ImportTracking {
            file,
            skip_duplicates,
            failed_out,
        } => {
            let sheet = Sheet::read(&file).await?;
            let report = ImportService::new(backend, config.sync.page_size)
                .import_tracking(&sheet, ImportOptions { skip_duplicates })
                .await?;
            print_import(&report, &sheet, failed_out.as_deref()).await?;
        }
        Command::ImportCustoms { file, failed_out } => {
            let sheet = Sheet::read(&file).await?;
            let report = ImportService::new(backend, config.sync.page_size)
                .import_customs(&sheet)
                .await?;
            print_import(&report, &sheet, failed_out.as_deref()).await?;
        }
        Command::ExportCustoms {
            output,
            bill_no,
            container_no,
            customs_no,
            arrival,
            declared,
        } => {
            let filter = CustomsFilter {
                bill_no,
                container_no,
                customs_no,
                arrival_date: DateFilter::parse(&arrival),
                declare_date: DateFilter::parse(&declared),
            };
            let store = TrackingStore::new(backend, config.sync.page_size);
            let snapshot = store.load().await?;
            let rows = views::customs(&snapshot.records, &filter);
            export_customs(&rows).write(&output).await?;
            println!("Exported {} record(s) to {}", rows.len(), output.display());
        }
        Command::Dashboard { card } => {
            let dashboard = DashboardService::new(backend, config.sync.page_size);
            match card {
                Some(card) => {
                    let card = DashboardCard::from(card);
                    let records = dashboard.details(card).await?;
                    println!("{} ({})", card.label(), records.len());
                    for t in records {
                        println!(
                            "  {}\t{}\t{}\t{}",
                            t.container_no, t.bill_no, t.customs_no, t.arrival_date
                        );
                    }
                }
                None => {
                    let counts = dashboard.counts().await?;
                    for card in DashboardCard::ALL {
                        println!("{}: {}", card.label(), counts.get(card));
                    }
                }
            }
        }
        Command::Attach { kind, files } => {
            let uploads = futures::future::try_join_all(files.iter().map(|path| read_upload(path))).await?;
            let report = AttachmentService::new(backend)
                .attach_by_name(&kind, uploads)
                .await?;
            for (file, container) in &report.attached {
                println!("attached  {} -> {}", file, container);
            }
            for file in &report.unmatched {
                println!("unmatched {}", file);
            }
            for (file, reason) in &report.failed {
                println!("failed    {}: {}", file, reason);
            }
        }
        Command::Files { page, per_page } => {
            let files = AttachmentService::new(backend)
                .list_files(PageRequest::new(page, per_page))
                .await?;
            for entry in &files.items {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    entry.upload_time, entry.container_no, entry.kind, entry.file_name, entry.file_url
                );
            }
            println!(
                "page {}/{} ({} records)",
                files.page,
                files.total_pages(),
                files.total
            );
        }
        Command::Links => {
            let links = LinkService::new(backend).list().await?;
            for (category, members) in group_by_category(&links) {
                println!("{}", category);
                for link in members {
                    println!("  {}\t{}", link.title, link.url);
                }
            }
        }
        Command::CreateUser { .. }
        | Command::ResetPassword { .. }
        | Command::Login { .. }
        | Command::Logout
        | Command::Template { .. } => bail!("Command does not use a data backend"),
    }
    Ok(())
}

async fn print_import(report: &ImportReport, sheet: &Sheet, failed_out: Option<&Path>) -> Result<()> {
    println!(
        "{} created, {} updated, {} failed",
        report.created,
        report.updated,
        report.failed.len()
    );
    for row in &report.failed {
        println!("  row {}: {}", row.row, row.reason);
    }
    if let (Some(path), false) = (failed_out, report.failed.is_empty()) {
        report.failed_sheet(&sheet.headers).write(path).await?;
        println!("Failed rows written to {}", path.display());
    }
    Ok(())
}

async fn read_upload(path: &Path) -> Result<FileUpload> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
        bail!("Invalid file name: {}", path.display());
    };
    Ok(FileUpload {
        filename: filename.to_string(),
        base64_data: data_encoding::BASE64.encode(&bytes),
        mime_type: None,
    })
}
