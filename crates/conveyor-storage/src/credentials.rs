//! AWS shared-credentials file parsing.

use std::path::Path;

use crate::error::{self, StorageError};

/// Static credentials read from one profile.
#[derive(Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***")
            .field("session_token", &self.session_token.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Read `profile` from the credentials file at `path`.
///
/// # Errors
///
/// Returns [`StorageError::Config`] if the file is unreadable or the
/// profile is missing either key.
pub fn load(path: &Path, profile: &str) -> error::Result<AwsCredentials> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        StorageError::Config(format!(
            "cannot read credentials file {}: {e}",
            path.display()
        ))
    })?;
    parse(&contents, profile)
}

/// Parse INI-style credentials content.
///
/// Section headers may be written `[name]` or `[profile name]`.
///
/// # Errors
///
/// Returns [`StorageError::Config`] if the profile or a key is missing.
pub fn parse(contents: &str, profile: &str) -> error::Result<AwsCredentials> {
    let mut in_profile = false;
    let mut found = false;
    let mut access_key_id = None;
    let mut secret_access_key = None;
    let mut session_token = None;

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(section) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let name = section.trim();
            let name = name.strip_prefix("profile ").unwrap_or(name).trim();
            in_profile = name == profile;
            found |= in_profile;
            continue;
        }
        if !in_profile {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim().to_string();
            match key.trim() {
                "aws_access_key_id" => access_key_id = Some(value),
                "aws_secret_access_key" => secret_access_key = Some(value),
                "aws_session_token" => session_token = Some(value),
                _ => {}
            }
        }
    }

    if !found {
        return Err(StorageError::Config(format!(
            "profile '{profile}' not found in credentials file"
        )));
    }
    match (access_key_id, secret_access_key) {
        (Some(access_key_id), Some(secret_access_key)) => Ok(AwsCredentials {
            access_key_id,
            secret_access_key,
            session_token,
        }),
        _ => Err(StorageError::Config(format!(
            "profile '{profile}' must set aws_access_key_id and aws_secret_access_key"
        ))),
    }
}
