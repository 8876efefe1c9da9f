pub mod server;

use anyhow::Result;

pub enum Action {
    Server(Box<server::Args>),
}

impl Action {
    /// # Errors
    /// Returns whatever the underlying action returns.
    pub async fn execute(self) -> Result<()> {
        match self {
            Self::Server(args) => server::execute(*args).await,
        }
    }
}
