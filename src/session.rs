use futures::future::BoxFuture;
use log::{debug, warn};
use std::sync::Arc;

use crate::db::{Database, DbSession};
use crate::error::AppError;

/// Runs units of work inside database sessions.
#[derive(Clone)]
pub struct SessionManager {
    database: Arc<dyn Database>,
}

impl SessionManager {
    pub fn new(database: Arc<dyn Database>) -> Self {
        Self { database }
    }

    pub fn database(&self) -> &Arc<dyn Database> {
        &self.database
    }

    /// Start a session, run `work` in it, then commit on `Ok` or abort on `Err`.
    ///
    /// The error returned by `work` is propagated unchanged. Work that must
    /// persist its writes and still fail returns `Ok(Err(..))` and lets the
    /// caller raise the inner error after the commit.
    pub async fn run<T, F>(&self, work: F) -> Result<T, AppError>
    where
        T: Send,
        F: for<'s> FnOnce(&'s mut dyn DbSession) -> BoxFuture<'s, Result<T, AppError>> + Send,
    {
        let mut session = self.database.start_session().await?;
        match work(session.as_mut()).await {
            Ok(value) => {
                session.commit().await?;
                debug!("session: committed");
                Ok(value)
            }
            Err(err) => {
                if let Err(abort_err) = session.abort().await {
                    warn!("session: abort failed after {}: {}", err, abort_err);
                } else {
                    debug!("session: aborted: {}", err);
                }
                Err(err)
            }
        }
    }
}
