use std::io;

use crate::net::CodecError;

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("failed to bind UDP port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("failed to reach {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("facade is already started")]
    AlreadyStarted,
    #[error("mediator is already bound to another socket facade")]
    MediatorBound,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
}
