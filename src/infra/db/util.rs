use crate::application::repos::RepoError;

/// Map a read-path sqlx failure onto the repository taxonomy.
///
/// Write paths wrap the same classification into their own variant so that
/// callers see `CreationFailed` or `Write` rather than a generic outage.
pub fn map_sqlx_error(err: sqlx::Error) -> RepoError {
    match err {
        sqlx::Error::RowNotFound => RepoError::NotFound,
        sqlx::Error::Database(db)
            if db
                .message()
                .contains("canceling statement due to statement timeout")
                || db
                    .message()
                    .contains("canceling statement due to user request") =>
        {
            RepoError::Timeout
        }
        sqlx::Error::PoolTimedOut => RepoError::Timeout,
        other => RepoError::unavailable(other),
    }
}

pub(crate) fn map_write_error(err: sqlx::Error) -> RepoError {
    match map_sqlx_error(err) {
        RepoError::Unavailable(message) => RepoError::Write(message),
        other => other,
    }
}

pub(crate) fn map_creation_error(err: sqlx::Error) -> RepoError {
    match map_sqlx_error(err) {
        RepoError::Unavailable(message) => RepoError::CreationFailed(message),
        RepoError::NotFound => RepoError::CreationFailed("insert returned no row".to_string()),
        other => other,
    }
}
