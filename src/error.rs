//! Error taxonomy shared by every sshbox operation.
use std::path::PathBuf;

use crate::ident::IdentError;
use crate::quantity::QuantityError;

pub type Result<T> = std::result::Result<T, SshboxError>;

#[derive(Debug, thiserror::Error)]
pub enum SshboxError {
    /// Malformed input. Nothing has been mutated when this is returned.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    /// The user has no service in the compiled descriptor.
    #[error("service {service} not found; check that user {username} exists in {registry:?}")]
    NotFound {
        username: String,
        service: String,
        registry: PathBuf,
    },
    /// An external runtime call failed. `stderr` carries the runtime's own diagnostic.
    #[error("runtime command `{command}` failed: {stderr}")]
    Runtime { command: String, stderr: String },
    #[error("registry {path:?}: {source}")]
    Registry {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("storage for {username}: {source}")]
    Storage {
        username: String,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid username {name:?}: {source}")]
    Username {
        name: String,
        #[source]
        source: IdentError,
    },
    #[error("invalid {field} port {value:?}: expected an integer between 0 and 65535")]
    Port { field: &'static str, value: String },
    #[error("host port {port} is already published by {owner}")]
    PortConflict { port: u16, owner: String },
    #[error("password must not contain ',' or line breaks")]
    Password,
    #[error("invalid {field} {value:?}: {source}")]
    Quantity {
        field: &'static str,
        value: String,
        #[source]
        source: QuantityError,
    },
}

impl SshboxError {
    /// Process exit status for this error, distinguishable per category.
    pub fn exit_code(&self) -> i32 {
        match self {
            SshboxError::Validation(_) => 2,
            SshboxError::NotFound { .. } => 3,
            SshboxError::Runtime { .. } => 4,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct() {
        let validation = SshboxError::from(ValidationError::Port {
            field: "ssh",
            value: "abc".to_string(),
        });
        let not_found = SshboxError::NotFound {
            username: "alice".to_string(),
            service: "alice-ssh".to_string(),
            registry: PathBuf::from("/tmp/users.csv"),
        };
        let runtime = SshboxError::Runtime {
            command: "docker compose up".to_string(),
            stderr: "boom".to_string(),
        };
        let other = SshboxError::from(anyhow::anyhow!("io"));

        assert_eq!(validation.exit_code(), 2);
        assert_eq!(not_found.exit_code(), 3);
        assert_eq!(runtime.exit_code(), 4);
        assert_eq!(other.exit_code(), 1);
    }

    #[test]
    fn test_not_found_message_names_registry() {
        let err = SshboxError::NotFound {
            username: "bob".to_string(),
            service: "bob-ssh".to_string(),
            registry: PathBuf::from("/srv/sshbox/users.csv"),
        };
        let msg = err.to_string();
        assert!(msg.contains("bob-ssh"));
        assert!(msg.contains("users.csv"));
    }
}
