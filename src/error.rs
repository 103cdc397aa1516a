use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("connection failed: {0}")]
    Connection(#[source] postgres::Error),

    #[error("database error: {0}")]
    Database(#[from] postgres::Error),

    #[error(
        "the hypopg extension is not installed on the database server\n\
         Install it from https://github.com/HypoPG/hypopg, then run: CREATE EXTENSION hypopg"
    )]
    HypopgMissing,

    #[error(
        "insufficient privileges to install the hypopg extension\n\
         Connect as a role that can run: CREATE EXTENSION hypopg"
    )]
    HypopgPrivilege,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
