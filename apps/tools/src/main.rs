use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use server_api::ApiContext;
use shared::{error::ApiError, protocol::CreateProgramRequest};
use storage::Storage;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/registry.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Insert the demo programs and clients into an empty registry.
    Seed,
    CreateProgram {
        name: String,
        description: String,
        #[arg(long)]
        inactive: bool,
    },
}

fn api_error(err: ApiError) -> anyhow::Error {
    anyhow!("{:?}: {}", err.code, err.message)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;
    let ctx = ApiContext::new(Arc::new(storage));

    match cli.command {
        Command::Seed => {
            if server_api::seed_demo_data(&ctx).await.map_err(api_error)? {
                println!("seeded demo registry");
            } else {
                println!("registry already has programs; nothing seeded");
            }
        }
        Command::CreateProgram {
            name,
            description,
            inactive,
        } => {
            let program = server_api::create_program(
                &ctx,
                CreateProgramRequest {
                    name,
                    description,
                    active: !inactive,
                },
            )
            .await
            .map_err(api_error)?;
            println!("created program_id={}", program.id);
        }
    }

    Ok(())
}
