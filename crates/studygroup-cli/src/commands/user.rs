use clap::Subcommand;
use studygroup_core::{RecordStore, SqliteRecordStore, UserRecord};

#[derive(Subcommand)]
pub enum UserAction {
    /// Register a user record
    Add {
        /// User ID
        user_id: String,
        /// Display name (defaults to the ID)
        #[arg(long)]
        name: Option<String>,
    },
    /// List registered user IDs
    List,
    /// Print a user record, including every stored session copy
    Show {
        /// User ID
        user_id: String,
    },
}

pub fn run(action: UserAction) -> Result<(), Box<dyn std::error::Error>> {
    let db = SqliteRecordStore::open()?;

    match action {
        UserAction::Add { user_id, name } => {
            let name = name.unwrap_or_else(|| user_id.clone());
            let record = UserRecord::new(user_id.as_str(), name);
            db.register_user(&record)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        UserAction::List => {
            let ids = db.user_ids()?;
            println!("{}", serde_json::to_string_pretty(&ids)?);
        }
        UserAction::Show { user_id } => {
            let record = db.get_user(&user_id)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
    }
    Ok(())
}
