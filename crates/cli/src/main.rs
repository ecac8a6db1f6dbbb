use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use emtct_core::{
    config::resolve_core_config, due_date, is_timely, Engine, EmtctError, TestCategory,
};
use emtct_types::PatientId;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "emtct")]
#[command(about = "EMTCT clinical record reconciliation CLI")]
struct Cli {
    /// Staged YAML configuration file
    #[arg(long, global = true, env = "EMTCT_CONFIG")]
    config: Option<PathBuf>,
    /// Configuration stage
    #[arg(long, global = true, env = "EMTCT_STAGE")]
    stage: Option<String>,
    /// Source-of-record database path
    #[arg(long, global = true, env = "EMTCT_SOURCE_DB")]
    source_db: Option<PathBuf>,
    /// Mirror registry database path
    #[arg(long, global = true, env = "EMTCT_MIRROR_DB")]
    mirror_db: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy a year's missing pregnancies from the source of record into the registry
    SyncPregnancies {
        /// LMP year
        year: i32,
    },
    /// Copy a year's missing EMTCT patients from the source of record into the registry
    SyncPatients {
        /// Year of the patients' pregnancies (2008 or later)
        year: i32,
    },
    /// Print the reconciled lab timeline for a patient
    Labs {
        patient_id: i64,
        /// Anchor on this LMP (YYYY-MM-DD) instead of the latest registry pregnancy
        #[arg(long)]
        lmp: Option<NaiveDate>,
    },
    /// Print an infant's syphilis screenings
    SyphilisScreenings { infant_id: i64 },
    /// Date by which a screening sample is due
    DueDate {
        /// Category label, e.g. "PCR 1" or "ELISA"
        category: String,
        /// Infant birth date (YYYY-MM-DD)
        birth_date: NaiveDate,
    },
    /// Whether a screening sample was taken in time
    Timely {
        category: String,
        birth_date: NaiveDate,
        sample_date: NaiveDate,
    },
    /// HIV screenings due in a year that still have no sample
    MissingPcrs { year: i32 },
}

fn parse_category(label: &str) -> TestCategory {
    let category = TestCategory::parse(label);
    if category == TestCategory::Unknown {
        eprintln!("Warning: '{label}' is not a known screening category");
    }
    category
}

fn open_engine(cli: &Cli) -> anyhow::Result<Engine> {
    let cfg = resolve_core_config(
        cli.config.clone(),
        cli.stage.clone(),
        cli.source_db.clone(),
        cli.mirror_db.clone(),
    )?;
    Ok(Engine::open(&cfg)?)
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("emtct_cli=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::SyncPregnancies { year }) => {
            let engine = open_engine(&cli)?;
            match engine.sync_year(&engine.call_context(), *year) {
                Ok(inserted) => {
                    println!("Inserted {} pregnancies for {}", inserted.len(), year);
                    for p in inserted {
                        println!(
                            "  pregnancy {} patient {} LMP {}",
                            p.pregnancy_id, p.patient_id, p.lmp
                        );
                    }
                }
                Err(e) => eprintln!("Error syncing pregnancies: {}", e),
            }
        }
        Some(Commands::SyncPatients { year }) => {
            let engine = open_engine(&cli)?;
            match engine.sync_patients(&engine.call_context(), *year) {
                Ok(inserted) => {
                    println!("Inserted {} patients for {}", inserted.len(), year);
                    for p in inserted {
                        println!("  patient {} {} {}", p.patient_id, p.first_name, p.last_name);
                    }
                }
                Err(EmtctError::InvalidInput(msg)) => eprintln!("Invalid year: {}", msg),
                Err(e) => eprintln!("Error syncing patients: {}", e),
            }
        }
        Some(Commands::Labs { patient_id, lmp }) => {
            let engine = open_engine(&cli)?;
            let ctx = engine.call_context();
            let patient_id = PatientId::new(*patient_id);
            let labs = match lmp {
                Some(lmp) => engine.labs(&ctx, patient_id, Some(*lmp)),
                None => engine.pregnancy_labs(&ctx, patient_id),
            };
            match labs {
                Ok(labs) if labs.is_empty() => println!("No lab results found."),
                Ok(labs) => {
                    for lab in labs {
                        let sampled = lab
                            .sample_collected_at
                            .map(|t| t.to_string())
                            .unwrap_or_else(|| "-".into());
                        println!(
                            "ID: {}, Test: {}, Result: {}, Received: {}, Sampled: {}",
                            lab.result_id, lab.test_name, lab.result, lab.order_received_at, sampled
                        );
                    }
                }
                Err(e) => eprintln!("Error reconstructing labs: {}", e),
            }
        }
        Some(Commands::SyphilisScreenings { infant_id }) => {
            let engine = open_engine(&cli)?;
            match engine.syphilis_screenings(&engine.call_context(), PatientId::new(*infant_id)) {
                Ok(screenings) if screenings.is_empty() => println!("No screenings found."),
                Ok(screenings) => {
                    for s in screenings {
                        println!(
                            "ID: {}, Test: {}, Result: {}, Screened: {}",
                            s.id, s.test_name, s.result, s.screening_date
                        );
                    }
                }
                Err(e) => eprintln!("Error reading syphilis screenings: {}", e),
            }
        }
        Some(Commands::DueDate {
            category,
            birth_date,
        }) => {
            let category = parse_category(category);
            println!("{}", due_date(category, *birth_date));
        }
        Some(Commands::Timely {
            category,
            birth_date,
            sample_date,
        }) => {
            let category = parse_category(category);
            let timely = is_timely(*birth_date, category, *sample_date);
            println!("{}", if timely { "timely" } else { "not timely" });
        }
        Some(Commands::MissingPcrs { year }) => {
            let engine = open_engine(&cli)?;
            match engine
                .screenings()
                .missing_pcrs(&engine.call_context(), *year)
            {
                Ok(infants) if infants.is_empty() => println!("No missing PCRs for {}.", year),
                Ok(infants) => {
                    for infant in infants {
                        println!("Infant {}:", infant.infant_id);
                        for s in infant.screenings {
                            println!("  {} due {}", s.details.test_name, s.due_date);
                        }
                    }
                }
                Err(EmtctError::InvalidInput(msg)) => eprintln!("Invalid year: {}", msg),
                Err(e) => eprintln!("Error building missing PCR report: {}", e),
            }
        }
        None => {
            println!("Use 'emtct --help' for commands");
        }
    }

    Ok(())
}
