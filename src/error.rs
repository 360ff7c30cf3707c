use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid target flags: {0:#x}")]
    InvalidFlags(u32),

    #[error("flow table setup failed: {0}")]
    TableSetup(String),
}

pub type Result<T> = std::result::Result<T, Error>;
