//! Username validation. Usernames end up in container names, hostnames,
//! volume names and command arguments, so they are checked once here and
//! carried around as [`Username`] afterwards.
use std::fmt::{self, Display};

use serde::Serialize;

/// Hostname labels are limited to 63 characters.
pub const MAX_USERNAME_LEN: usize = 63;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentError {
    #[error("username must not be empty")]
    Empty,
    #[error("username must not begin with '-'")]
    LeadingHyphen,
    #[error("username is {0} characters long, at most 63 are allowed")]
    TooLong(usize),
    #[error("username must begin with a letter or digit, found {0:?}")]
    InvalidStart(char),
    #[error("username may only contain letters, digits, '.', '_' and '-', found {0:?}")]
    InvalidCharacter(char),
}

/// A username that passed [`validate`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Username(String);

impl Username {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compose service and container name.
    pub fn service_name(&self) -> String {
        format!("{}-ssh", self.0)
    }

    /// Named volume used when the user has no dedicated storage.
    pub fn volume_name(&self) -> String {
        format!("{}-home", self.0)
    }

    pub fn hostname(&self) -> &str {
        &self.0
    }

    pub fn home_dir(&self) -> String {
        format!("/home/{}", self.0)
    }
}

impl Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

pub fn validate(name: &str) -> Result<Username, IdentError> {
    let mut chars = name.chars();
    let first = match chars.next() {
        None => return Err(IdentError::Empty),
        Some('-') => return Err(IdentError::LeadingHyphen),
        Some(c) => c,
    };

    let len = name.chars().count();
    if len > MAX_USERNAME_LEN {
        return Err(IdentError::TooLong(len));
    }

    if !first.is_ascii_alphanumeric() {
        return Err(IdentError::InvalidStart(first));
    }

    if let Some(c) = chars.find(|c| !is_identifier_char(*c)) {
        return Err(IdentError::InvalidCharacter(c));
    }

    Ok(Username(name.to_owned()))
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}
