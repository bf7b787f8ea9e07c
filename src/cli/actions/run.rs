use super::{Action, server, user};
use anyhow::Result;

pub async fn execute(action: Action) -> Result<()> {
    match action {
        Action::Server(args) => server::execute(args).await,
        Action::CreateUser(args) => user::execute(args).await,
        Action::ChangeGrant(args) => user::execute_grant(args).await,
    }
}
