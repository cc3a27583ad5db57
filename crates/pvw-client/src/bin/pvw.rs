//! pvw: command-line entity import/export against a Purview account.
//!
//! Credentials come from `PURVIEW_ACCOUNT_NAME`, `AZURE_TENANT_ID`,
//! `AZURE_CLIENT_ID` and `AZURE_CLIENT_SECRET` (a `.env` file is honored).

use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pvw_client::{
    read_csv_records, validate_records, CsvBatchProcessor, EntityTemplate, PurviewClient,
    PurviewConfig,
};

#[derive(Parser)]
#[command(name = "pvw")]
#[command(author, version, about = "Bulk entity import/export for Microsoft Purview")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Entity import, export, and validation
    Entity {
        #[command(subcommand)]
        command: EntityCommands,
    },
    /// Inspect entity templates
    Template {
        #[command(subcommand)]
        command: TemplateCommands,
    },
}

#[derive(Subcommand)]
enum EntityCommands {
    /// Create entities from a CSV file
    ImportCsv {
        /// CSV file to import
        #[arg(short, long)]
        file: PathBuf,

        /// Built-in template name or path to a template JSON file
        #[arg(short, long, default_value = "table")]
        template: String,

        /// Entities per bulk request
        #[arg(short, long, env = "IMPORT_BATCH_SIZE")]
        batch_size: Option<usize>,

        /// Validate only; make no catalog calls
        #[arg(long)]
        dry_run: bool,
    },

    /// Write catalog entities of the template's type to CSV
    ExportCsv {
        /// Built-in template name or path to a template JSON file
        #[arg(short, long, default_value = "table")]
        template: String,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Search keywords
        #[arg(short, long, default_value = "*")]
        query: String,

        /// Maximum entities to export
        #[arg(short, long, default_value_t = 1000)]
        limit: u32,
    },

    /// Check a CSV file against a template without contacting the catalog
    ValidateCsv {
        #[arg(short, long)]
        file: PathBuf,

        #[arg(short, long, default_value = "table")]
        template: String,
    },
}

#[derive(Subcommand)]
enum TemplateCommands {
    /// Print a template as JSON
    Show {
        /// Built-in template name or path to a template JSON file
        name: String,
    },
    /// List built-in templates
    List,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "pvw_client=info".into()),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Commands::Entity { command } => match command {
            EntityCommands::ImportCsv {
                file,
                template,
                batch_size,
                dry_run,
            } => cmd_import(&file, &template, batch_size, dry_run).await,
            EntityCommands::ExportCsv {
                template,
                output,
                query,
                limit,
            } => cmd_export(&template, output, &query, limit).await,
            EntityCommands::ValidateCsv { file, template } => cmd_validate(&file, &template),
        },
        Commands::Template { command } => match command {
            TemplateCommands::Show { name } => {
                let template = EntityTemplate::load(&name)?;
                println!("{}", serde_json::to_string_pretty(&template)?);
                Ok(ExitCode::SUCCESS)
            }
            TemplateCommands::List => {
                for name in EntityTemplate::BUILTIN {
                    if let Some(t) = EntityTemplate::builtin(name) {
                        println!("{:<10} {}", t.name, t.type_name);
                    }
                }
                Ok(ExitCode::SUCCESS)
            }
        },
    }
}

fn processor() -> anyhow::Result<CsvBatchProcessor> {
    let config = PurviewConfig::from_env()?;
    let batch_size = config.batch_size;
    let client = PurviewClient::new(&config)?;
    Ok(CsvBatchProcessor::new(Arc::new(client)).with_batch_size(batch_size))
}

fn read_records(file: &PathBuf) -> anyhow::Result<(Vec<String>, Vec<pvw_client::Record>)> {
    let reader = BufReader::new(
        File::open(file).with_context(|| format!("cannot open {}", file.display()))?,
    );
    Ok(read_csv_records(reader)?)
}

fn cmd_validate(file: &PathBuf, template: &str) -> anyhow::Result<ExitCode> {
    let template = EntityTemplate::load(template)?;
    let (headers, records) = read_records(file)?;

    let missing = template.missing_required_headers(&headers);
    if !missing.is_empty() {
        eprintln!("Missing required columns: {}", missing.join(", "));
    }

    let report = validate_records(&template, &records);
    for error in &report.errors {
        eprintln!("{}", error);
    }
    println!(
        "{} rows, {} valid, {} invalid",
        report.total_rows,
        report.entities.len(),
        report.invalid_rows()
    );

    Ok(if report.errors.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn cmd_import(
    file: &PathBuf,
    template: &str,
    batch_size: Option<usize>,
    dry_run: bool,
) -> anyhow::Result<ExitCode> {
    if dry_run {
        return cmd_validate(file, template);
    }

    let template = EntityTemplate::load(template)?;
    let (_, records) = read_records(file)?;

    let mut processor = processor()?;
    if let Some(size) = batch_size {
        processor = processor.with_batch_size(size);
    }

    let progress = |done: usize, total: usize| eprintln!("batch {}/{}", done, total);
    let report = processor.import(&template, &records, Some(&progress)).await;

    for error in &report.errors {
        eprintln!("{}", error);
    }
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(if report.entities_failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn cmd_export(
    template: &str,
    output: Option<PathBuf>,
    query: &str,
    limit: u32,
) -> anyhow::Result<ExitCode> {
    let template = EntityTemplate::load(template)?;
    let processor = processor()?;

    let written = match output {
        Some(path) => {
            let file = File::create(&path)
                .with_context(|| format!("cannot create {}", path.display()))?;
            processor
                .export_search(&template, query, limit, file)
                .await?
        }
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            let n = processor
                .export_search(&template, query, limit, &mut handle)
                .await?;
            handle.flush()?;
            n
        }
    };

    eprintln!("Exported {} entities", written);
    Ok(ExitCode::SUCCESS)
}
