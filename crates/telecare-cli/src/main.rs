//! Telecare CLI - record patient care offline from the terminal
//!
//! Every command writes to the local store first; `telecare sync` pushes the
//! queue once the sync service is reachable.

mod cli;
mod commands;
mod error;

use clap::Parser;

use crate::cli::{AppointmentCommands, Cli, Commands, PatientCommands, SosCommands};
use crate::commands::appointment::{run_book, run_set_status, Booking};
use crate::commands::common::resolve_settings;
use crate::commands::list::{run_list, ListQuery};
use crate::commands::patient::{run_patient_add, PatientDetails};
use crate::commands::records::{run_delete, run_retry};
use crate::commands::sos::{run_sos_cancel, run_sos_raise, SosAlert};
use crate::commands::status::run_status;
use crate::commands::sync::run_sync;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "telecare=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = resolve_settings(cli.db_path, cli.config.as_deref())?;

    match cli.command {
        Commands::Patient {
            command:
                PatientCommands::Add {
                    name,
                    age,
                    gender,
                    phone,
                    village,
                    language,
                },
        } => {
            let details = PatientDetails {
                age,
                gender,
                phone,
                village,
                language,
            };
            run_patient_add(&name, details, &settings).await?;
        }
        Commands::Appointment { command } => match command {
            AppointmentCommands::Book {
                patient,
                doctor,
                at,
                reason,
                mode,
            } => {
                let booking = Booking {
                    patient_id: patient,
                    doctor_id: doctor,
                    scheduled_at: at,
                    reason,
                    mode,
                };
                run_book(booking, &settings).await?;
            }
            AppointmentCommands::SetStatus { id, status } => {
                run_set_status(&id, status.into(), &settings).await?;
            }
        },
        Commands::Sos { command } => match command {
            SosCommands::Raise {
                patient,
                message,
                latitude,
                longitude,
            } => {
                let alert = SosAlert {
                    patient_id: patient,
                    message,
                    latitude,
                    longitude,
                };
                run_sos_raise(alert, cli.offline, &settings).await?;
            }
            SosCommands::Cancel { id } => run_sos_cancel(&id, &settings).await?,
        },
        Commands::List {
            collection,
            patient,
            date,
            status,
            limit,
            json,
        } => {
            let query = ListQuery {
                patient_id: patient,
                date,
                status: status.map(Into::into),
                limit,
            };
            run_list(collection.into(), query, json, &settings).await?;
        }
        Commands::Status { json } => run_status(json, &settings).await?,
        Commands::Sync => {
            run_sync(cli.offline, &settings).await?;
        }
        Commands::Retry { collection, id } => {
            run_retry(collection.into(), &id, &settings).await?;
        }
        Commands::Delete { collection, id } => {
            run_delete(collection.into(), &id, &settings).await?;
        }
    }

    Ok(())
}
