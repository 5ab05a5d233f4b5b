use anyhow::{bail, Context, Result};
use cachet_core::{RecordForm, SecretStore};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Cachet - an encrypted append-log secret store
#[derive(Parser)]
#[command(name = "cachet")]
#[command(about = "Single-user encrypted secret store", long_about = None)]
struct Cli {
    /// Path of the snapshot file
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Directory for fragments and backup tarballs
    #[arg(long, global = true)]
    backups: Option<PathBuf>,

    /// Session lifetime in minutes
    #[arg(long, global = true, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..=1024))]
    term: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new store
    Init,

    /// Add a new entry
    Add {
        /// Title for the entry
        #[arg(long)]
        title: String,

        /// Username
        #[arg(long, default_value = "")]
        username: String,

        /// Password (prompted when omitted)
        #[arg(long)]
        password: Option<String>,

        /// Notes
        #[arg(long, default_value = "")]
        notes: String,
    },

    /// List entries
    List {
        /// Show the recycle bin instead of live entries
        #[arg(long)]
        deleted: bool,
    },

    /// Show one entry with its history
    Show {
        /// Entry id
        id: String,
    },

    /// Edit an entry; omitted flags keep the current value
    Edit {
        /// Entry id
        id: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        alias: Option<String>,

        #[arg(long)]
        username: Option<String>,

        #[arg(long)]
        password: Option<String>,

        #[arg(long)]
        notes: Option<String>,
    },

    /// Search entries by exact alias
    Search {
        /// Alias, case-sensitive
        alias: String,
    },

    /// Move an entry to the recycle bin
    Trash {
        /// Entry id
        id: String,
    },

    /// Restore an entry from the recycle bin
    Restore {
        /// Entry id
        id: String,
    },

    /// Delete an entry forever (recycle bin only)
    Purge {
        /// Entry id
        id: String,
    },

    /// Delete one history entry of a record
    HistoryRm {
        /// Entry id
        id: String,

        /// Exact datetime of the history entry, YYYY-MM-DD HH:MM:SS
        datetime: String,
    },

    /// Change the store password
    Passwd,

    /// Print a fresh random password
    Generate,

    /// Show or replace the settings blob
    Settings {
        /// New settings blob (base64 JSON)
        #[arg(long)]
        set: Option<String>,
    },

    /// Delete old backup tarballs, keeping the newest ten
    PruneBackups,
}

fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::WARN)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");

    let cli = Cli::parse();
    let store = open_store(&cli)?;

    match cli.command {
        Commands::Init => {
            let password = rpassword::prompt_password("New store password: ")?;
            let confirm = rpassword::prompt_password("Confirm password: ")?;
            if password != confirm {
                bail!("passwords do not match");
            }
            store.create(&password)?;
            println!("Store created.");
        }
        Commands::Generate => {
            println!("{}", store.generate_password());
        }
        command => {
            let password = rpassword::prompt_password("Store password: ")?;
            if let Some(tarball) = store.unlock(&password)? {
                println!("Compacted fragments; backup written to {}", tarball.display());
            }
            run(&store, command)?;
        }
    }
    Ok(())
}

fn open_store(cli: &Cli) -> Result<SecretStore> {
    let data_dir = match &cli.db {
        Some(db) => db
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".")),
        None => dirs::data_local_dir()
            .context("no data directory on this platform; pass --db")?
            .join("cachet"),
    };
    let db = cli.db.clone().unwrap_or_else(|| data_dir.join("cachet.db"));
    let backups = cli.backups.clone().unwrap_or_else(|| data_dir.join("backups"));

    let store = SecretStore::new(db, backups);
    store.set_valid_term(Duration::from_secs(cli.term * 60))?;
    Ok(store)
}

fn run(store: &SecretStore, command: Commands) -> Result<()> {
    match command {
        Commands::Init | Commands::Generate => unreachable!("handled before unlock"),
        Commands::Add {
            title,
            username,
            password,
            notes,
        } => {
            let password = match password {
                Some(password) => password,
                None => rpassword::prompt_password("Entry password: ")?,
            };
            let form = RecordForm {
                title,
                username,
                password,
                notes,
                ..RecordForm::default()
            };
            let id = store.add(&form)?;
            println!("Added entry {}", id);
        }
        Commands::List { deleted } => {
            let entries = if deleted {
                store.list_deleted()?
            } else {
                store.list_all()?
            };
            if entries.is_empty() {
                println!("No entries.");
            }
            for entry in entries {
                print_summary(&entry);
            }
        }
        Commands::Show { id } => {
            let form = store.get(&id)?;
            print_full(&form);
        }
        Commands::Edit {
            id,
            title,
            alias,
            username,
            password,
            notes,
        } => {
            let mut form = store.get(&id)?;
            if let Some(title) = title {
                form.title = title;
            }
            if let Some(alias) = alias {
                form.alias = alias;
            }
            if let Some(username) = username {
                form.username = username;
            }
            if let Some(password) = password {
                form.password = password;
            }
            if let Some(notes) = notes {
                form.notes = notes;
            }
            store.update(&form)?;
            println!("Updated entry {}", id);
        }
        Commands::Search { alias } => {
            let entries = store.search_by_alias(&alias)?;
            if entries.is_empty() {
                println!("No entry with alias {:?}.", alias);
            }
            for entry in entries {
                print_summary(&entry);
            }
        }
        Commands::Trash { id } => {
            store.trash(&id)?;
            println!("Moved {} to the recycle bin.", id);
        }
        Commands::Restore { id } => match store.undelete(&id)? {
            Some(alias) => println!(
                "Restored {}; alias {:?} was taken by a live entry and has been cleared.",
                id, alias
            ),
            None => println!("Restored {}.", id),
        },
        Commands::Purge { id } => {
            store.delete_forever(&id)?;
            println!("Deleted {} forever.", id);
        }
        Commands::HistoryRm { id, datetime } => {
            store.delete_history_item(&id, &datetime)?;
            println!("History entry removed.");
        }
        Commands::Passwd => {
            let old = rpassword::prompt_password("Current password: ")?;
            let new = rpassword::prompt_password("New password: ")?;
            let confirm = rpassword::prompt_password("Confirm new password: ")?;
            if new != confirm {
                bail!("passwords do not match");
            }
            store.change_password(&old, &new)?;
            println!("Password changed; the store is locked again.");
        }
        Commands::Settings { set } => match set {
            Some(settings) => {
                store.update_settings(&settings)?;
                println!("Settings updated.");
            }
            None => {
                let settings = store.settings()?;
                if settings.is_empty() {
                    println!("No settings stored.");
                } else {
                    println!("{}", settings);
                }
            }
        },
        Commands::PruneBackups => {
            let removed = store.prune_backups()?;
            println!("Removed {} old backup tarball(s).", removed);
        }
    }
    Ok(())
}

fn print_summary(form: &RecordForm) {
    let alias = if form.alias.is_empty() {
        String::new()
    } else {
        format!(" [{}]", form.alias)
    };
    println!(
        "{}  {}{}  {}  (updated {})",
        form.id, form.title, alias, form.username, form.updated_at
    );
}

fn print_full(form: &RecordForm) {
    println!("id:        {}", form.id);
    println!("title:     {}", form.title);
    if !form.alias.is_empty() {
        println!("alias:     {}", form.alias);
    }
    println!("username:  {}", form.username);
    println!("password:  {}", form.password);
    if !form.notes.is_empty() {
        println!("notes:     {}", form.notes);
    }
    println!("created:   {}", form.created_at);
    println!("updated:   {}", form.updated_at);
    if form.is_deleted() {
        println!("deleted:   {}", form.deleted_at);
    }
    for entry in &form.history {
        println!(
            "history:   {}  {} / {}",
            entry.date_time, entry.username, entry.password
        );
    }
}
