pub mod dict;

#[derive(clap::Subcommand)]
pub enum Commands {
    /// Handle dictionary archives
    Dict {
        #[command(subcommand)]
        command: dict::DictCommands,
    },
}

impl Commands {
    pub fn handle(&self) -> miette::Result<()> {
        match self {
            Commands::Dict { command } => command.handle(),
        }
    }
}
