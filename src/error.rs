//! Error taxonomy (§7), shaped after `controller/src/util/mod.rs`'s
//! `ControllerError`: a flat enum of named, expected failure kinds plus an
//! `Other` catch-all for whatever bubbles up through `anyhow`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    /// §7.1 — tunnel call failed. The queue retries these with backoff;
    /// surfaced here only when a façade operation awaits one directly.
    #[error("tunnel transport error: {0}")]
    Transport(#[source] anyhow::Error),

    /// §7.3 — install requested for a pod-key with no biz model in the
    /// store. Indicates a reconciler bug upstream of this engine.
    #[error("missing precondition: no pod found for key {0}")]
    MissingPrecondition(String),

    /// §6 — `RunInContainer`/`AttachToContainer`/`PortForward` are not
    /// implemented by this provider.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(&'static str),

    /// A pod lookup by key found nothing.
    #[error("pod not found: {0}")]
    PodNotFound(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T, E = ProviderError> = std::result::Result<T, E>;
