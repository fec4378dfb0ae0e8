use crate::{
    coordinator::CoordinatorError, legacy::LegacyError, manager::UnknownTool,
    probe::ProbeError, process::InvocationError, store::StoreError,
};

pub type Result<T> = core::result::Result<T, Error>;

/// Any failure surfaced by this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Invocation(Box<InvocationError>),

    #[error(transparent)]
    Probe(Box<ProbeError>),

    #[error(transparent)]
    UnknownTool(UnknownTool),

    #[error(transparent)]
    Coordinator(Box<CoordinatorError>),

    #[error(transparent)]
    Store(Box<StoreError>),

    #[error(transparent)]
    Legacy(Box<LegacyError>),
}

impl From<InvocationError> for Error {
    fn from(error: InvocationError) -> Self {
        Error::Invocation(Box::new(error))
    }
}

impl From<ProbeError> for Error {
    fn from(error: ProbeError) -> Self {
        Error::Probe(Box::new(error))
    }
}

impl From<UnknownTool> for Error {
    fn from(error: UnknownTool) -> Self {
        Error::UnknownTool(error)
    }
}

impl From<CoordinatorError> for Error {
    fn from(error: CoordinatorError) -> Self {
        Error::Coordinator(Box::new(error))
    }
}

impl From<StoreError> for Error {
    fn from(error: StoreError) -> Self {
        Error::Store(Box::new(error))
    }
}

impl From<LegacyError> for Error {
    fn from(error: LegacyError) -> Self {
        Error::Legacy(Box::new(error))
    }
}
