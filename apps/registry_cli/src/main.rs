use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use client_core::{
    views::filter_by_status_text, ClientDetailView, ClientDraft, ClientsView, DeleteOutcome,
    EnrollReconcile, EnrollmentDraft, EnrollmentRow, EnrollmentsView, ProgramDraft, ProgramsView,
    RegistryApi, RegistryClient,
};
use shared::domain::{ClientId, EnrollmentId, EnrollmentStatus};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Health program registry client")]
struct Args {
    #[arg(long, default_value = "http://127.0.0.1:4000")]
    server_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List programs, optionally filtered by name or description.
    Programs {
        #[arg(long, default_value = "")]
        query: String,
    },
    CreateProgram {
        name: String,
        description: String,
        #[arg(long)]
        inactive: bool,
    },
    /// List clients, optionally filtered by name, email or contact number.
    Clients {
        #[arg(long, default_value = "")]
        query: String,
    },
    /// Server-side client search.
    Search { query: String },
    Register {
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long)]
        date_of_birth: String,
        #[arg(long)]
        gender: String,
        #[arg(long)]
        contact_number: String,
        #[arg(long, default_value = "")]
        email: String,
        #[arg(long, default_value = "")]
        address: String,
    },
    /// Show a client profile and its enrollments.
    Show { client_id: String },
    Enroll {
        client_id: String,
        #[arg(long)]
        program_id: String,
        #[arg(long)]
        date: String,
        #[arg(long, default_value = "Active")]
        status: EnrollmentStatus,
    },
    Unenroll {
        client_id: String,
        enrollment_id: String,
    },
    SetStatus {
        enrollment_id: String,
        status: EnrollmentStatus,
    },
    /// List every enrollment.
    Enrollments {
        #[arg(long, default_value = "")]
        query: String,
        /// Keep rows whose status contains this text.
        #[arg(long)]
        status: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();
    let args = Args::parse();
    let api: Arc<dyn RegistryApi> = Arc::new(RegistryClient::new(&args.server_url)?);

    match args.command {
        Command::Programs { query } => {
            let mut view = ProgramsView::new(api);
            view.load().await?;
            view.set_query(query);
            for program in view.programs() {
                let state = if program.active { "active" } else { "inactive" };
                println!(
                    "{}\t{}\t{}\t{}",
                    program.id, program.name, state, program.description
                );
            }
        }
        Command::CreateProgram {
            name,
            description,
            inactive,
        } => {
            let mut view = ProgramsView::new(api);
            let mut draft = ProgramDraft::new(name, description);
            draft.active = !inactive;
            let program = view.create(&draft).await?;
            info!(program_id = %program.id, "program created");
            println!("created program_id={}", program.id);
        }
        Command::Clients { query } => {
            let mut view = ClientsView::new(api);
            view.load().await?;
            view.set_query(query);
            for row in view.rows() {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    row.id, row.full_name, row.gender, row.date_of_birth, row.contact_number
                );
            }
        }
        Command::Search { query } => {
            for client in api.search_clients(&query).await? {
                println!("{}\t{}", client.id, client.full_name());
            }
        }
        Command::Register {
            first_name,
            last_name,
            date_of_birth,
            gender,
            contact_number,
            email,
            address,
        } => {
            let mut view = ClientsView::new(api);
            let draft = ClientDraft {
                first_name,
                last_name,
                date_of_birth,
                gender,
                contact_number,
                email,
                address,
            };
            let client = view.register(&draft).await?;
            println!("registered client_id={}", client.id);
        }
        Command::Show { client_id } => {
            let mut view = ClientDetailView::new(api, ClientId::from(client_id));
            view.load().await?;
            let profile = view
                .profile()
                .ok_or_else(|| anyhow!("client profile unavailable"))?;
            println!("{}", profile.full_name);
            println!("  date of birth: {}", profile.date_of_birth);
            println!("  gender:        {}", profile.gender);
            println!("  contact:       {}", profile.contact_number);
            println!("  email:         {}", profile.email);
            println!("  address:       {}", profile.address);
            println!("  registered:    {}", profile.registered_on);
            print_rows(&view.rows());
        }
        Command::Enroll {
            client_id,
            program_id,
            date,
            status,
        } => {
            let mut view = ClientDetailView::new(api, ClientId::from(client_id))
                .with_reconcile(EnrollReconcile::Reload);
            view.load().await?;
            let draft = EnrollmentDraft::new(program_id, date).with_status(status);
            let enrollment = view.enroll(&draft).await?;
            println!("created enrollment_id={}", enrollment.id);
        }
        Command::Unenroll {
            client_id,
            enrollment_id,
        } => {
            let mut view = ClientDetailView::new(api, ClientId::from(client_id));
            view.load().await?;
            view.request_delete(EnrollmentId::from(enrollment_id));
            let ticket = view.confirm_delete().ok_or_else(|| {
                anyhow!(view.banner().unwrap_or("delete was not started").to_string())
            })?;
            match view.settle(ticket).await {
                DeleteOutcome::Removed => println!("enrollment deleted"),
                DeleteOutcome::AlreadyGone => println!("enrollment was already deleted"),
                DeleteOutcome::RolledBack(err) => return Err(err.into()),
            }
        }
        Command::SetStatus {
            enrollment_id,
            status,
        } => {
            let mut view = EnrollmentsView::new(api);
            view.load().await?;
            let updated = view
                .synchronizer()
                .update_status(&EnrollmentId::from(enrollment_id), status)
                .await?;
            println!("enrollment {} is now {}", updated.id, updated.status);
        }
        Command::Enrollments { query, status } => {
            let mut view = EnrollmentsView::new(api);
            view.load().await?;
            view.set_query(query);
            let mut rows = view.rows();
            if let Some(status) = status {
                rows = filter_by_status_text(rows, &status);
            }
            print_rows(&rows);
        }
    }

    Ok(())
}

fn print_rows(rows: &[EnrollmentRow]) {
    if rows.is_empty() {
        println!("no enrollments");
        return;
    }
    for row in rows {
        println!(
            "{}\t{}\t{}\t{}\t{}",
            row.id, row.client_name, row.program_name, row.enrollment_date, row.status
        );
    }
}
