use std::path::PathBuf;

use clap::{Parser, Subcommand};
use fsis_rs::{
    FsecForm, InspectionForm, InspectionRecord, LogbookClient, PhotoAttachment, StorageMode,
};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "fsis_cli")]
#[command(about = "Operator CLI for the fire-safety inspection logbook")]
struct Args {
    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show whether records go to the database or stay on this device
    Status,
    /// Verify credentials against the remote login procedure
    Login {
        username: String,
        /// Read from FSIS_PASSWORD when omitted
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        remember_me: bool,
    },
    /// List inspection records
    Inspections {
        /// Only records without coordinates
        #[arg(long)]
        no_location: bool,
    },
    /// Add an inspection record
    AddInspection {
        #[arg(long)]
        business_name: String,
        #[arg(long)]
        barangay: String,
        #[arg(long)]
        line: String,
        #[arg(long)]
        date_inspected: String,
        #[arg(long, default_value = "")]
        owner: String,
        #[arg(long, default_value = "")]
        io_number: String,
        #[arg(long, default_value = "")]
        fsic_number: String,
        #[arg(long, default_value = "")]
        inspected_by: String,
        /// Photo file; EXIF supplies coordinates and capture time
        #[arg(long)]
        photo: Option<PathBuf>,
        /// Fallback coordinates when the photo has no GPS tag
        #[arg(long)]
        lat: Option<f64>,
        #[arg(long)]
        lng: Option<f64>,
    },
    /// Delete an inspection record by list index
    DeleteInspection {
        index: usize,
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
    /// List FSEC building-plan records
    Fsec,
    /// Add an FSEC building-plan record
    AddFsec {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        proposed_project: String,
        #[arg(long)]
        barangay: String,
        #[arg(long)]
        line: String,
        #[arg(long)]
        date: String,
        #[arg(long)]
        contact_number: String,
    },
    /// Delete an FSEC record by list index
    DeleteFsec {
        index: usize,
        #[arg(long)]
        yes: bool,
    },
}

fn print_inspection(idx: usize, record: &InspectionRecord) {
    let location = match (record.lat, record.lng) {
        (Some(lat), Some(lng)) => format!("{lat:.5}, {lng:.5}"),
        _ => "no location".to_string(),
    };
    println!(
        "[{idx}] {} | {} | {} | {} | {:?}",
        record.business_name,
        record.display_address(),
        record.date_inspected,
        location,
        record.sync_state,
    );
}

fn confirm_or_abort(yes: bool, what: &str) {
    if !yes {
        error!("refusing to delete {what} without --yes");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(format!("fsis_rs={}", args.log_level))
        .init();

    dotenv::dotenv().ok();
    let cache_dir = std::env::var("FSIS_CACHE_DIR").unwrap_or_else(|_| "./.fsis_cache".to_string());
    let mut client = LogbookClient::from_env(PathBuf::from(cache_dir).as_path())?;

    match args.command {
        Command::Status => {
            match client.storage_mode().await {
                StorageMode::Database => println!("storage: database"),
                StorageMode::Local => println!("storage: this device only"),
            }
        }
        Command::Login {
            username,
            password,
            remember_me,
        } => {
            let password = match password.or_else(|| std::env::var("FSIS_PASSWORD").ok()) {
                Some(password) => password,
                None => {
                    error!("pass --password or set FSIS_PASSWORD");
                    std::process::exit(1);
                }
            };
            match client.authenticate(&username, &password, remember_me).await? {
                Some(session) => {
                    info!("logged in as {} ({})", session.display_name, session.role)
                }
                None => {
                    error!("invalid username or password");
                    std::process::exit(1);
                }
            }
        }
        Command::Inspections { no_location } => {
            let outcome = client.init_inspection_data().await;
            info!("inspection data: {:?}", outcome);
            for (idx, record) in client.inspections().iter().enumerate() {
                if no_location && record.has_location() {
                    continue;
                }
                print_inspection(idx, record);
            }
        }
        Command::AddInspection {
            business_name,
            barangay,
            line,
            date_inspected,
            owner,
            io_number,
            fsic_number,
            inspected_by,
            photo,
            lat,
            lng,
        } => {
            client.init_inspection_data().await;
            if let (Some(lat), Some(lng)) = (lat, lng) {
                client.update_device_fix(lat, lng);
            }
            let attachment = match photo {
                Some(path) => {
                    let bytes = std::fs::read(&path)?;
                    let file_name = path
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                        .unwrap_or_else(|| "photo.jpg".to_string());
                    Some(PhotoAttachment::new(file_name, bytes))
                }
                None => None,
            };
            let form = InspectionForm {
                io_number,
                fsic_number,
                owner,
                business_name,
                barangay,
                line,
                date_inspected,
                inspected_by,
                ..Default::default()
            };
            let outcome = client.save_inspection(None, form, attachment).await?;
            info!("saved: {:?}", outcome);
        }
        Command::DeleteInspection { index, yes } => {
            confirm_or_abort(yes, "an inspection record");
            client.init_inspection_data().await;
            client.delete_inspection(index).await?;
            info!("deleted inspection record {index}");
        }
        Command::Fsec => {
            let outcome = client.init_fsec_data().await;
            info!("fsec data: {:?}", outcome);
            for (idx, record) in client.fsecs().iter().enumerate() {
                println!(
                    "[{idx}] {} | {} | {} | {} | {:?}",
                    record.fsec_owner,
                    record.proposed_project,
                    record.display_address(),
                    record.fsec_date,
                    record.sync_state,
                );
            }
        }
        Command::AddFsec {
            owner,
            proposed_project,
            barangay,
            line,
            date,
            contact_number,
        } => {
            client.init_fsec_data().await;
            let form = FsecForm {
                owner,
                proposed_project,
                barangay,
                line,
                date,
                contact_number,
                ..Default::default()
            };
            let outcome = client.save_fsec(None, form).await?;
            info!("saved: {:?}", outcome);
        }
        Command::DeleteFsec { index, yes } => {
            confirm_or_abort(yes, "an FSEC record");
            client.init_fsec_data().await;
            client.delete_fsec(index).await?;
            info!("deleted fsec record {index}");
        }
    }

    Ok(())
}
