use thiserror::Error;

/// Errors that can occur while configuring or building the gRPC transport.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportSetupError {
    /// The endpoint URI or TLS settings were rejected.
    #[error("invalid endpoint: {0}")]
    Endpoint(#[from] tonic::transport::Error),

    /// A setting read from the environment could not be parsed.
    #[error("invalid value '{value}' for {name}")]
    InvalidSetting { name: &'static str, value: String },

    /// The method name is not a valid gRPC path.
    #[error("invalid gRPC method: {0}")]
    InvalidMethod(String),
}
