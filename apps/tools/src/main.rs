use anyhow::Result;
use clap::{Parser, Subcommand};
use uuid::Uuid;

use shared::domain::{OutletId, ProductId, TransferId, UserId};
use storage::{NewLine, Storage};

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/transfers.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    CreateOutlet {
        name: String,
    },
    CreateUser {
        username: String,
    },
    CreateTransfer {
        source_outlet_id: i64,
        destination_outlet_id: i64,
        created_by: i64,
    },
    AddLine {
        transfer_id: i64,
        product_id: Uuid,
        product_name: String,
        qty_planned: i64,
    },
    Show {
        transfer_id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::CreateOutlet { name } => {
            let outlet_id = storage.create_outlet(&name).await?;
            println!("created outlet_id={}", outlet_id.0);
        }
        Command::CreateUser { username } => {
            let user_id = storage.create_user(&username).await?;
            println!("created user_id={}", user_id.0);
        }
        Command::CreateTransfer {
            source_outlet_id,
            destination_outlet_id,
            created_by,
        } => {
            let transfer_id = storage
                .create_transfer(
                    OutletId(source_outlet_id),
                    OutletId(destination_outlet_id),
                    UserId(created_by),
                    &[],
                )
                .await?;
            println!("created transfer_id={}", transfer_id.0);
        }
        Command::AddLine {
            transfer_id,
            product_id,
            product_name,
            qty_planned,
        } => {
            let edit = storage
                .add_line(
                    TransferId(transfer_id),
                    &NewLine {
                        product_id: ProductId(product_id),
                        product_name,
                        qty_planned,
                        stock_at_source: None,
                        stock_at_destination: None,
                        manually_added: false,
                    },
                )
                .await?;
            println!("add line: {edit:?}");
        }
        Command::Show { transfer_id } => {
            match storage.get_transfer(TransferId(transfer_id)).await? {
                None => println!("transfer {transfer_id} not found"),
                Some(transfer) => {
                    println!(
                        "transfer {} [{}] outlet {} -> outlet {}",
                        transfer.id.0,
                        transfer.status,
                        transfer.source_outlet_id.0,
                        transfer.destination_outlet_id.0
                    );
                    if let Some(code) = &transfer.tracking_code {
                        println!("tracking: {code}");
                    }
                    for line in &transfer.lines {
                        println!(
                            "  {} planned={} counted={:?} received={:?}{}",
                            line.product_name,
                            line.qty_planned,
                            line.qty_counted,
                            line.qty_received_counted,
                            if line.manually_added { " (manual)" } else { "" }
                        );
                    }
                }
            }
        }
    }

    Ok(())
}
