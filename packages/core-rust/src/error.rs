//! Error taxonomy shared by the class registry, instance registry, and scheduler.

/// Errors raised while registering, constructing, starting, or destroying
/// managed objects.
///
/// `ClassNotFound` and `Configuration` propagate to the caller of
/// `new_instance`. `Startup` and `Destruction` are recovered by the scheduler
/// and the destroy fan-out respectively; they surface only through logging.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("class not found: {fqn}")]
    ClassNotFound { fqn: String },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("failed to construct {fqn}: {source}")]
    Construction {
        fqn: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("init hook failed for {name}: {source}")]
    Hook {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("instance {name} previously failed initialization")]
    InstanceFailed { name: String },

    #[error("instance {name} is not a {expected}")]
    TypeMismatch { name: String, expected: &'static str },

    #[error("service {service} failed to start: {source}")]
    Startup {
        service: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("destructor failed for {name}: {source}")]
    Destruction {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

impl Error {
    /// Shorthand for a [`Error::Configuration`] with a formatted message.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

/// Convenience alias used across the workspace.
pub type Result<T, E = Error> = std::result::Result<T, E>;
