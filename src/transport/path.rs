use std::fmt;
use std::str::FromStr;

use crate::error::TransportSetupError;

/// A validated gRPC method name: `{package}.{service}/{method}`
///
/// Example: `grpc.health.v1.Health/Check` has package `grpc.health.v1`,
/// service `Health` and method `Check`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GrpcPath {
    pub package: String,
    pub service: String,
    pub method: String,
}

impl GrpcPath {
    /// Parse a method name, with or without a leading slash.
    pub fn parse(name: &str) -> Result<Self, TransportSetupError> {
        let trimmed = name.strip_prefix('/').unwrap_or(name);
        let invalid = |reason: &str| TransportSetupError::InvalidMethod(format!("{reason}: '{name}'"));

        let (qualified, method) = trimmed
            .rsplit_once('/')
            .ok_or_else(|| invalid("expected 'package.Service/Method'"))?;
        let (package, service) = qualified
            .rsplit_once('.')
            .ok_or_else(|| invalid("service must be qualified with a package"))?;

        if !is_identifier(service) || !is_identifier(method) {
            return Err(invalid("service and method must be identifiers"));
        }
        if !package.split('.').all(is_identifier) {
            return Err(invalid("package segments must be identifiers"));
        }

        Ok(Self {
            package: package.to_owned(),
            service: service.to_owned(),
            method: method.to_owned(),
        })
    }

    /// `{package}.{service}`
    pub fn full_service(&self) -> String {
        format!("{}.{}", self.package, self.service)
    }

    /// The HTTP/2 `:path` for this method.
    pub fn request_path(&self) -> String {
        format!("/{self}")
    }
}

fn is_identifier(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl FromStr for GrpcPath {
    type Err = TransportSetupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for GrpcPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}/{}", self.package, self.service, self.method)
    }
}
