use paradump_engine::DumpError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("failed to read the defaults file: {0}")]
    DefaultsFileRead(#[from] std::io::Error),

    #[error("failed to parse the defaults file: {0}")]
    DefaultsFileParse(String),

    #[error("invalid option: {0}")]
    Flag(String),

    /// MySQL driver error while expanding the table selection.
    #[error("MySQL error: {0}")]
    MySql(#[from] mysql_async::Error),

    #[error(transparent)]
    Dump(#[from] DumpError),
}
