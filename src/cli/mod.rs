use std::fs::File;
use std::io::{stdin, stdout, Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};

use crate::application::{LedgerService, MovementFilter, NewMovement, NewTransfer};
use crate::config::{init_tracing, Config};
use crate::domain::{parse_quantity, Movement, MovementKind, Quantity, SubjectKind};
use crate::io::{parse_timestamp, Exporter, ImportOptions, Importer};

/// Inventario - material and tool ledger for field technicians
#[derive(Parser)]
#[command(name = "inventario")]
#[command(about = "Track materials and tools held by field technicians with an append-only ledger")]
#[command(version)]
pub struct Cli {
    /// Settings file path
    #[arg(long, default_value = "inventario.json", global = true)]
    pub config: PathBuf,

    /// Database file path (overrides the settings file)
    #[arg(short, long, global = true)]
    pub database: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Subject (technician, warehouse) catalog commands
    #[command(subcommand)]
    Subject(SubjectCommands),

    /// Material catalog commands
    #[command(subcommand)]
    Material(MaterialCommands),

    /// Record a single movement
    Record {
        /// Kind: initial, transfer_in, consumption, transfer_out, adjustment_credit, adjustment_debit
        kind: String,

        /// Quantity (positive whole number)
        quantity: String,

        /// Holder code
        #[arg(long)]
        subject: String,

        /// Material code
        #[arg(long)]
        material: String,

        /// Invoice, work order or acta number
        #[arg(short, long)]
        reference: Option<String>,

        /// Date of the movement (YYYY-MM-DD or RFC 3339, defaults to now)
        #[arg(long)]
        date: Option<String>,
    },

    /// Move stock from one holder to another
    Transfer {
        /// Quantity to move
        quantity: String,

        /// Material code
        #[arg(long)]
        material: String,

        /// Source holder code
        #[arg(long)]
        from: String,

        /// Destination holder code
        #[arg(long)]
        to: String,

        /// Invoice, work order or acta number
        #[arg(short, long)]
        reference: Option<String>,

        /// Date of the transfer (YYYY-MM-DD or RFC 3339, defaults to now)
        #[arg(long)]
        date: Option<String>,
    },

    /// Show current balances
    Balance {
        /// Only this holder
        #[arg(long)]
        subject: Option<String>,

        /// Only this material
        #[arg(long)]
        material: Option<String>,

        /// Include exhausted (zero) balances
        #[arg(long)]
        all: bool,
    },

    /// List recorded movements
    Movements {
        /// Filter by holder
        #[arg(long)]
        subject: Option<String>,

        /// Filter by material
        #[arg(long)]
        material: Option<String>,

        /// Filter by kind
        #[arg(long)]
        kind: Option<String>,

        /// Filter from date (YYYY-MM-DD)
        #[arg(long)]
        from_date: Option<String>,

        /// Filter to date (YYYY-MM-DD)
        #[arg(long)]
        to_date: Option<String>,

        /// Maximum number of movements to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Bulk import movements from a CSV sheet (all or nothing)
    Import {
        /// Input file (stdin if omitted)
        input: Option<String>,

        /// Parse and validate without importing
        #[arg(long)]
        dry_run: bool,

        /// Do not add unknown subjects and materials to the catalogs
        #[arg(long)]
        no_register: bool,

        /// Kind for rows without Tipo_Movimiento
        #[arg(long)]
        default_kind: Option<String>,
    },

    /// Export data to CSV
    Export {
        /// What to export: movements, balances
        export_type: String,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,

        /// Also write the balances summary to this file (movements export only)
        #[arg(long)]
        with_balances: Option<String>,
    },

    /// Generate reports
    #[command(subcommand)]
    Report(ReportCommands),
}

#[derive(Subcommand)]
pub enum SubjectCommands {
    /// Register a new holder
    Add {
        /// Unique code
        code: String,

        /// Display name (defaults to the code)
        #[arg(short, long)]
        name: Option<String>,

        /// Kind: technician, warehouse, system
        #[arg(short = 't', long = "kind", default_value = "technician")]
        kind: String,
    },

    /// List registered holders
    List,

    /// Show a holder and what it currently carries
    Show {
        /// Holder code
        code: String,
    },
}

#[derive(Subcommand)]
pub enum MaterialCommands {
    /// Register a new material or tool
    Add {
        /// Unique code
        code: String,

        /// Display name (defaults to the code)
        #[arg(short, long)]
        name: Option<String>,

        /// Unit of measure (e.g. m, unit, box)
        #[arg(short, long)]
        unit: Option<String>,
    },

    /// List registered materials
    List,
}

#[derive(Subcommand)]
pub enum ReportCommands {
    /// Materials ranked by consumption
    Consumption {
        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,

        /// End date (YYYY-MM-DD)
        #[arg(long)]
        to: Option<String>,

        /// Only consumption by this holder
        #[arg(long)]
        subject: Option<String>,

        /// Keep only the N most consumed materials
        #[arg(long)]
        top: Option<usize>,

        /// Output format: table, json, csv
        #[arg(long, default_value = "table")]
        format: String,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let mut config = Config::load(&self.config)?;
        if let Some(database) = self.database {
            config.database = database;
        }
        if self.verbose {
            config.log_level = "debug".to_string();
        }
        init_tracing(&config.log_level);

        match self.command {
            Commands::Init => {
                LedgerService::init(&config.database).await?;
                println!("Database initialized: {}", config.database);
            }

            Commands::Subject(cmd) => {
                let service = open_service(&config).await?;
                run_subject_command(&service, cmd).await?;
            }

            Commands::Material(cmd) => {
                let service = open_service(&config).await?;
                run_material_command(&service, cmd).await?;
            }

            Commands::Record {
                kind,
                quantity,
                subject,
                material,
                reference,
                date,
            } => {
                let service = open_service(&config).await?;
                let kind = parse_kind(&kind)?;
                let quantity = parse_cli_quantity(&quantity)?;
                let timestamp = parse_optional_date(date.as_deref())?.unwrap_or_else(Utc::now);

                let mut request = NewMovement::new(kind, subject, material, quantity).at(timestamp);
                if let Some(reference) = reference {
                    request = request.with_reference(reference);
                }

                let movement = service.record_movement(request).await?;
                let balance = service
                    .current_balance(&movement.subject, &movement.material)
                    .await?;
                println!(
                    "Recorded #{} {} {} {} for {} (balance now {})",
                    movement.sequence,
                    movement.kind,
                    movement.quantity,
                    movement.material,
                    movement.subject,
                    balance
                );
            }

            Commands::Transfer {
                quantity,
                material,
                from,
                to,
                reference,
                date,
            } => {
                let service = open_service(&config).await?;
                let request = NewTransfer {
                    material,
                    quantity: parse_cli_quantity(&quantity)?,
                    from_subject: from,
                    to_subject: to,
                    reference,
                    timestamp: parse_optional_date(date.as_deref())?.unwrap_or_else(Utc::now),
                };

                let result = service.transfer(request).await?;
                println!(
                    "Transferred {} {}: {} -> {}",
                    result.debit.quantity,
                    result.debit.material,
                    result.debit.subject,
                    result.credit.subject
                );
            }

            Commands::Balance {
                subject,
                material,
                all,
            } => {
                let service = open_service(&config).await?;
                let entries: Vec<_> = service
                    .current_balances()
                    .await?
                    .into_iter()
                    .filter(|e| subject.as_deref().is_none_or(|s| e.subject == s))
                    .filter(|e| material.as_deref().is_none_or(|m| e.material == m))
                    .filter(|e| all || e.quantity != 0)
                    .collect();

                if entries.is_empty() {
                    println!("No stock found.");
                } else {
                    println!("{:<20} {:<20} {:>10}", "SUBJECT", "MATERIAL", "BALANCE");
                    println!("{}", "-".repeat(52));
                    for entry in entries {
                        println!(
                            "{:<20} {:<20} {:>10}",
                            entry.subject, entry.material, entry.quantity
                        );
                    }
                }
            }

            Commands::Movements {
                subject,
                material,
                kind,
                from_date,
                to_date,
                limit,
            } => {
                let service = open_service(&config).await?;
                let filter = MovementFilter {
                    subject,
                    material,
                    kind: kind.as_deref().map(parse_kind).transpose()?,
                    from_date: parse_optional_date(from_date.as_deref())?,
                    to_date: parse_end_date(to_date.as_deref())?,
                    limit,
                };
                let movements = service.list_movements(&filter).await?;
                print_movements(&movements);
            }

            Commands::Import {
                input,
                dry_run,
                no_register,
                default_kind,
            } => {
                let service = open_service(&config).await?;
                let options = ImportOptions {
                    dry_run,
                    auto_register: config.auto_register && !no_register,
                    default_kind: match default_kind {
                        Some(label) => parse_kind(&label)?,
                        None => config.default_import_kind,
                    },
                };
                run_import_command(&service, input.as_deref(), options).await?;
            }

            Commands::Export {
                export_type,
                output,
                with_balances,
            } => {
                let service = open_service(&config).await?;
                run_export_command(
                    &service,
                    &export_type,
                    output.as_deref(),
                    with_balances.as_deref(),
                )
                .await?;
            }

            Commands::Report(cmd) => {
                let service = open_service(&config).await?;
                run_report_command(&service, cmd).await?;
            }
        }

        Ok(())
    }
}

async fn run_subject_command(service: &LedgerService, cmd: SubjectCommands) -> Result<()> {
    match cmd {
        SubjectCommands::Add { code, name, kind } => {
            let kind = SubjectKind::from_str(&kind).ok_or_else(|| {
                anyhow::anyhow!(
                    "Invalid subject kind '{}'. Valid kinds: technician, warehouse, system",
                    kind
                )
            })?;
            let subject = service.register_subject(&code, name, kind).await?;
            println!("Registered subject: {} ({})", subject.code, subject.kind);
        }

        SubjectCommands::List => {
            let subjects = service.list_subjects().await?;
            if subjects.is_empty() {
                println!("No subjects registered.");
            } else {
                println!("{:<16} {:<28} {:<12}", "CODE", "NAME", "KIND");
                println!("{}", "-".repeat(58));
                for subject in subjects {
                    println!(
                        "{:<16} {:<28} {:<12}",
                        subject.code, subject.name, subject.kind
                    );
                }
            }
        }

        SubjectCommands::Show { code } => {
            // Holdings are shown even for unregistered codes
            match service.get_subject(&code).await {
                Ok(subject) => {
                    println!("Subject: {}", subject.code);
                    println!("  Name:       {}", subject.name);
                    println!("  Kind:       {}", subject.kind);
                    println!(
                        "  Registered: {}",
                        subject.created_at.format("%Y-%m-%d %H:%M:%S")
                    );
                }
                Err(_) => println!("Subject: {} (not in catalog)", code),
            }

            let holdings = service.subject_holdings(&code).await?;
            println!();
            if holdings.is_empty() {
                println!("  Holds nothing.");
            } else {
                for entry in holdings {
                    println!("  {:<20} {:>10}", entry.material, entry.quantity);
                }
            }
        }
    }
    Ok(())
}

async fn run_material_command(service: &LedgerService, cmd: MaterialCommands) -> Result<()> {
    match cmd {
        MaterialCommands::Add { code, name, unit } => {
            let material = service.register_material(&code, name, unit).await?;
            println!("Registered material: {}", material.code);
        }

        MaterialCommands::List => {
            let materials = service.list_materials().await?;
            if materials.is_empty() {
                println!("No materials registered.");
            } else {
                println!("{:<16} {:<28} {:<8}", "CODE", "NAME", "UNIT");
                println!("{}", "-".repeat(54));
                for material in materials {
                    println!(
                        "{:<16} {:<28} {:<8}",
                        material.code,
                        material.name,
                        material.unit.as_deref().unwrap_or("-")
                    );
                }
            }
        }
    }
    Ok(())
}

async fn run_import_command(
    service: &LedgerService,
    input: Option<&str>,
    options: ImportOptions,
) -> Result<()> {
    let reader: Box<dyn Read> = match input {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("Failed to open input file: {}", path))?;
            Box::new(file)
        }
        None => Box::new(stdin()),
    };

    let dry_run = options.dry_run;
    let result = Importer::new(service)
        .import_movements_csv(reader, options)
        .await?;

    if dry_run {
        println!("Validation successful");
        println!("  Layout: {:?}", result.schema);
        println!("  Rows:   {}", result.rows);
        return Ok(());
    }

    println!("Import complete");
    println!("  Imported: {}", result.rows);
    if let Some(summary) = result.summary {
        if !summary.registered_subjects.is_empty() {
            println!(
                "  New subjects:  {}",
                summary.registered_subjects.join(", ")
            );
        }
        if !summary.registered_materials.is_empty() {
            println!(
                "  New materials: {}",
                summary.registered_materials.join(", ")
            );
        }
    }
    Ok(())
}

async fn run_export_command(
    service: &LedgerService,
    export_type: &str,
    output: Option<&str>,
    with_balances: Option<&str>,
) -> Result<()> {
    let exporter = Exporter::new(service);

    match export_type {
        "movements" => {
            let count = exporter.export_movements_csv(open_output(output)?).await?;
            if output.is_some() {
                eprintln!("Exported {} movements", count);
            }
            if let Some(path) = with_balances {
                let count = exporter.export_balances_csv(open_output(Some(path))?).await?;
                eprintln!("Exported {} balances to {}", count, path);
            }
        }
        "balances" => {
            let count = exporter.export_balances_csv(open_output(output)?).await?;
            if output.is_some() {
                eprintln!("Exported {} balances", count);
            }
        }
        other => anyhow::bail!(
            "Unknown export type '{}'. Valid types: movements, balances",
            other
        ),
    }

    Ok(())
}

async fn run_report_command(service: &LedgerService, cmd: ReportCommands) -> Result<()> {
    match cmd {
        ReportCommands::Consumption {
            from,
            to,
            subject,
            top,
            format,
        } => {
            let filter = MovementFilter {
                subject,
                from_date: parse_optional_date(from.as_deref())?,
                to_date: parse_end_date(to.as_deref())?,
                ..MovementFilter::default()
            };
            let report = service.consumption_report(&filter, top).await?;

            match format.as_str() {
                "json" => {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
                "csv" => {
                    println!("material,total,count,percentage");
                    for row in &report.materials {
                        println!(
                            "{},{},{},{:.2}",
                            row.material, row.total, row.count, row.percentage
                        );
                    }
                }
                _ => {
                    println!("Consumption Report");
                    if let Some(subject) = &report.subject {
                        println!("Subject: {}", subject);
                    }
                    println!();
                    println!(
                        "{:<20} {:>10} {:>8} {:>10}",
                        "MATERIAL", "TOTAL", "COUNT", "% OF TOTAL"
                    );
                    println!("{}", "-".repeat(51));
                    for row in &report.materials {
                        println!(
                            "{:<20} {:>10} {:>8} {:>9.1}%",
                            row.material, row.total, row.count, row.percentage
                        );
                    }
                    println!("{}", "-".repeat(51));
                    println!("{:<20} {:>10}", "TOTAL", report.total);
                }
            }
        }
    }
    Ok(())
}

fn print_movements(movements: &[Movement]) {
    if movements.is_empty() {
        println!("No movements found.");
        return;
    }

    println!(
        "{:>5} {:<17} {:<18} {:<14} {:<14} {:>8} {}",
        "SEQ", "DATE", "KIND", "SUBJECT", "MATERIAL", "QTY", "REFERENCE"
    );
    println!("{}", "-".repeat(96));
    for m in movements {
        println!(
            "{:>5} {:<17} {:<18} {:<14} {:<14} {:>8} {}",
            m.sequence,
            m.timestamp.format("%Y-%m-%d %H:%M"),
            m.kind,
            m.subject,
            m.material,
            m.signed_quantity(),
            m.reference.as_deref().unwrap_or("")
        );
    }
}

fn open_output(path: Option<&str>) -> Result<Box<dyn Write>> {
    Ok(match path {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path))?;
            Box::new(file)
        }
        None => Box::new(stdout()),
    })
}

fn parse_kind(label: &str) -> Result<MovementKind> {
    MovementKind::from_label(label).ok_or_else(|| {
        anyhow::anyhow!(
            "Invalid movement kind '{}'. Valid kinds: initial, transfer_in, consumption, transfer_out, adjustment_credit, adjustment_debit",
            label
        )
    })
}

fn parse_cli_quantity(input: &str) -> Result<Quantity> {
    parse_quantity(input).map_err(|e| anyhow::anyhow!("Invalid quantity '{}': {}", input, e))
}

async fn open_service(config: &Config) -> Result<LedgerService> {
    LedgerService::connect(&config.database)
        .await
        .with_context(|| format!("Failed to open {} (run `inventario init`?)", config.database))
}

/// Upper bound of a date filter. A bare `YYYY-MM-DD` covers the whole day.
fn parse_end_date(input: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    input
        .map(|s| match NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            Ok(date) => date
                .and_hms_micro_opt(23, 59, 59, 999_999)
                .map(|end| end.and_utc())
                .ok_or_else(|| anyhow::anyhow!("Invalid end date: {}", s)),
            Err(_) => parse_timestamp(s),
        })
        .transpose()
}

fn parse_optional_date(input: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    input
        .map(|s| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map(|d| d.and_time(chrono::NaiveTime::MIN).and_utc())
                .or_else(|_| parse_timestamp(s))
        })
        .transpose()
}
