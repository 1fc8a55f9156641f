pub mod migrate;
pub mod server;

use anyhow::Result;

#[derive(Debug)]
pub enum Action {
    Server(server::Args),
    MigrateSecrets(migrate::Args),
}

impl Action {
    /// Run the action to completion.
    ///
    /// # Errors
    /// Returns an error if the action fails.
    pub async fn execute(self) -> Result<()> {
        match self {
            Self::Server(args) => server::execute(args).await,
            Self::MigrateSecrets(args) => migrate::execute(args).await,
        }
    }
}
