//! `server`: run the HTTP API.

use crate::context::AppContext;
use crate::error::CliError;

pub async fn run(context: &AppContext) -> Result<(), CliError> {
    crate::server::serve(context)
        .await
        .map_err(|e| CliError::Server(e.to_string()))
}
