use {
    anyhow::Result,
    clap::Subcommand,
    herald_common::Backend,
    herald_config::HeraldConfig,
    herald_membership::MembershipRegistry,
};

#[derive(Subcommand)]
pub enum RegistryAction {
    /// List registered recipients.
    List {
        /// `whatsapp` or `telegram`.
        #[arg(long)]
        backend: Backend,
    },
    /// Register a recipient.
    Add {
        #[arg(long)]
        backend: Backend,
        id: String,
    },
    /// Remove a recipient.
    Remove {
        #[arg(long)]
        backend: Backend,
        id: String,
    },
}

pub async fn handle_registry(config: &HeraldConfig, action: RegistryAction) -> Result<()> {
    let registry = MembershipRegistry::from_files(
        config.registry_path(Backend::WhatsApp),
        config.registry_path(Backend::Telegram),
    );
    for line in apply(&registry, action).await? {
        println!("{line}");
    }
    Ok(())
}

async fn apply(registry: &MembershipRegistry, action: RegistryAction) -> Result<Vec<String>> {
    let lines = match action {
        RegistryAction::List { backend } => {
            let members = registry.members(backend).await?;
            if members.is_empty() {
                vec![format!("No {backend} recipients registered.")]
            } else {
                members
            }
        },
        RegistryAction::Add { backend, id } => {
            if registry.add(backend, &id).await? {
                vec![format!("Added {id} to {backend}.")]
            } else {
                vec![format!("{id} is already registered on {backend}.")]
            }
        },
        RegistryAction::Remove { backend, id } => {
            if registry.remove(backend, &id).await? {
                vec![format!("Removed {id} from {backend}.")]
            } else {
                vec![format!("{id} is not registered on {backend}.")]
            }
        },
    };
    Ok(lines)
}
