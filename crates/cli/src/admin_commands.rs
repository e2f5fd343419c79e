use std::sync::Arc;

use {
    anyhow::Result,
    clap::Subcommand,
    herald_config::HeraldConfig,
    herald_control::{AdminFile, AdminSource, AuthorizationGate},
};

#[derive(Subcommand)]
pub enum AdminAction {
    /// List administrator ids from the admin file.
    List,
    /// Check whether a sender id would be accepted.
    Check { id: String },
}

pub fn handle_admins(config: &HeraldConfig, action: AdminAction) -> Result<()> {
    let file = Arc::new(AdminFile::new(config.admins_path()));
    match action {
        AdminAction::List => {
            let admins = file.load()?;
            if admins.is_empty() {
                println!("No administrators in {}.", file.path().display());
            }
            for admin in admins {
                println!("{admin}");
            }
        },
        AdminAction::Check { id } => {
            println!("{}", verdict(&AuthorizationGate::new(file), &id));
        },
    }
    Ok(())
}

fn verdict(gate: &AuthorizationGate, id: &str) -> String {
    if gate.is_authorized(id.trim()) {
        format!("✅ {id} is an administrator")
    } else {
        format!("❌ {id} is not an administrator")
    }
}
