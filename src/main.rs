#![allow(clippy::print_stdout)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use sms_shield::config::AppConfig;
use sms_shield::logging::init_logging;
use sms_shield::models::{ContactUpdate, Direction, MessageStatus, PageCursor, SourceRecord};
use sms_shield::ShieldService;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file layered over the defaults
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import the message source (first run only unless forced)
    Import {
        /// Import even if the first-run import already happened
        #[arg(long)]
        force: bool,
    },
    /// Store a live message made of one or more fragments
    Receive {
        /// Sender phone number
        #[arg(short, long)]
        from: String,

        /// Source timestamp in milliseconds (defaults to now)
        #[arg(short, long)]
        timestamp: Option<i64>,

        /// Record the message as sent by the device owner
        #[arg(long)]
        outgoing: bool,

        /// Message fragments, joined in order
        #[arg(required = true)]
        fragments: Vec<String>,
    },
    /// Classify one message, or the next batch of unchecked messages
    Classify {
        /// Message id (omit for a batch)
        #[arg(short, long)]
        id: Option<i64>,
    },
    /// Retry deferred classifications if the classifier is reachable
    Drain,
    /// Show messages, newest first
    Page {
        /// Rows to skip
        #[arg(short, long, default_value = "0")]
        offset: usize,

        /// Rows to return (0 uses the configured default)
        #[arg(short, long, default_value = "0")]
        limit: usize,

        /// Continue after the message with this timestamp (needs --after-id)
        #[arg(long, requires = "after_id")]
        after_timestamp: Option<i64>,

        /// Continue after the message with this id (needs --after-timestamp)
        #[arg(long, requires = "after_timestamp")]
        after_id: Option<i64>,

        /// Only messages with this status
        #[arg(short, long)]
        status: Option<MessageStatus>,

        /// Only messages containing this text
        #[arg(long)]
        search: Option<String>,
    },
    /// List or search contacts
    Contacts {
        /// Name or number fragment
        #[arg(short, long)]
        query: Option<String>,
    },
    /// Add a known contact
    AddContact {
        /// Display name
        #[arg(short, long)]
        name: String,

        /// Phone number
        #[arg(short, long)]
        phone: String,
    },
    /// Edit a contact
    EditContact {
        /// Contact id
        id: i64,

        /// New display name
        #[arg(short, long)]
        name: Option<String>,

        /// New phone number
        #[arg(short, long)]
        phone: Option<String>,
    },
    /// Delete a contact and its messages
    DeleteContact {
        /// Contact id
        id: i64,
    },
    /// Show the conversation with a contact
    Conversation {
        /// Contact id
        id: i64,
    },
    /// Block a contact
    Block {
        /// Contact id
        id: i64,
    },
    /// Unblock a contact
    Unblock {
        /// Contact id
        id: i64,
    },
    /// Set a message's status by hand
    Override {
        /// Message id
        id: i64,

        /// New status (unchecked, safe, spam)
        status: MessageStatus,
    },
    /// Delete a message here and in the message source
    Delete {
        /// Message id
        id: i64,
    },
    /// Merge names from the contact directory
    SyncContacts,
    /// Send a message
    Send {
        /// Recipient phone number
        #[arg(short, long)]
        to: String,

        /// Message text
        body: String,
    },
    /// Show counts
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Load configuration
    let config = AppConfig::load_from(cli.config.as_deref()).context("Failed to load configuration")?;

    // Initialize logging; the guard flushes file output on exit
    let _log_guard = init_logging(&config.logging).context("Failed to initialize logging")?;

    info!("Starting sms-shield");

    let service = ShieldService::from_config(&config).context("Failed to open the message store")?;

    // Retry deferred classifications on every launch
    if !matches!(cli.command, Commands::Drain) {
        if let Err(e) = service.resume().await {
            warn!(error = %e, "Retry queue drain failed");
        }
    }

    // Process command
    match cli.command {
        Commands::Import { force } => {
            if force {
                print_json(&service.bulk_import().await?)?;
                print_json(&service.trigger_batch().await?)?;
            } else if let Some(report) = service.first_run_import().await? {
                print_json(&report.import)?;
                print_json(&report.batch)?;
            } else {
                println!("First-run import already done; use --force to import again");
            }
        },
        Commands::Receive {
            from,
            timestamp,
            outgoing,
            fragments,
        } => receive(&service, from, timestamp, outgoing, fragments).await?,
        Commands::Classify { id: Some(id) } => {
            let outcome = service.classify(id).await?;
            println!("{outcome:?}");
        },
        Commands::Classify { id: None } => print_json(&service.trigger_batch().await?)?,
        Commands::Drain => match service.resume().await? {
            Some(report) => print_json(&report)?,
            None => println!("Offline; retry queue left untouched"),
        },
        Commands::Page {
            offset,
            limit,
            after_timestamp,
            after_id,
            status,
            search,
        } => {
            let messages = if let Some(status) = status {
                service.messages_by_status(status, limit)?
            } else if let Some(query) = search {
                service.search_messages(&query, limit)?
            } else if let (Some(timestamp), Some(id)) = (after_timestamp, after_id) {
                service.page_after(Some(PageCursor { timestamp, id }), limit)?
            } else {
                service.page(offset, limit)?
            };
            print_json(&messages)?;
        },
        Commands::Contacts { query } => print_json(&service.contacts(query.as_deref())?)?,
        Commands::AddContact { name, phone } => print_json(&service.add_contact(&name, &phone)?)?,
        Commands::EditContact { id, name, phone } => {
            let update = ContactUpdate {
                name,
                phone_number: phone,
                status: None,
            };
            print_json(&service.edit_contact(id, &update)?)?;
        },
        Commands::DeleteContact { id } => report_removed("Contact", id, service.delete_contact(id)?),
        Commands::Conversation { id } => print_json(&service.conversation(id)?)?,
        Commands::Block { id } => print_json(&service.block_contact(id)?)?,
        Commands::Unblock { id } => print_json(&service.unblock_contact(id)?)?,
        Commands::Override { id, status } => print_json(&service.override_status(id, status)?)?,
        Commands::Delete { id } => report_removed("Message", id, service.delete_message(id).await?),
        Commands::SyncContacts => println!("Updated {} contacts", service.sync_directory().await?),
        Commands::Send { to, body } => print_json(&service.send_message(&to, &body).await?)?,
        Commands::Stats => print_json(&service.stats()?)?,
    }

    Ok(())
}

async fn receive(
    service: &ShieldService, from: String, timestamp: Option<i64>, outgoing: bool, fragments: Vec<String>,
) -> Result<()> {
    let timestamp_millis = timestamp.unwrap_or_else(|| Utc::now().timestamp_millis());
    let direction = if outgoing { Direction::Outgoing } else { Direction::Incoming };

    let records: Vec<SourceRecord> = fragments
        .into_iter()
        .map(|body| SourceRecord {
            sender: from.clone(),
            body,
            timestamp_millis,
            direction,
        })
        .collect();

    let Some(outcome) = service.receive(&records).await? else {
        println!("Message skipped: missing sender or body");
        return Ok(());
    };

    print_json(&outcome.stored.message)?;
    if let Some(handle) = outcome.classification {
        let classified = handle.await.context("Classification task failed")??;
        println!("{classified:?}");
    }
    Ok(())
}

fn report_removed(kind: &str, id: i64, removed: bool) {
    if removed {
        println!("{kind} {id} deleted");
    } else {
        println!("{kind} {id} not found");
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
