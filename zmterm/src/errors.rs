use thiserror::Error;

use zmcore::ZmError;

pub type IFtResult<T> = Result<T, IFtError>;

/// An Interactive Fiction terminal client error: either something went
/// wrong talking to the terminal, or the Z-machine itself faulted.
#[derive(Debug, Error)]
pub enum IFtError {
    #[error("terminal IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Z-machine error: {0}")]
    Zm(#[from] ZmError),
}
