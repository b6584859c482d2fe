//! Shared credentials file format.
//!
//! ```text
//! [profile]
//! aws_access_key_id = ...
//! aws_secret_access_key = ...
//! aws_session_token = ...
//! region = ...
//! ```
//!
//! Profiles and keys keep their file order. Unknown keys are kept verbatim
//! so rewriting a file only touches what was upserted.

use crate::error::{AppError, ErrorCode};
use crate::plumbing::AwsCredentials;
use thiserror::Error;

pub const ACCESS_KEY_ID: &str = "aws_access_key_id";
pub const SECRET_ACCESS_KEY: &str = "aws_secret_access_key";
pub const SESSION_TOKEN: &str = "aws_session_token";
pub const REGION: &str = "region";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Profile {
    pub name: String,
    entries: Vec<(String, String)>,
}

impl Profile {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: Vec::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Replaces the value in place, or appends the key.
    pub fn set(&mut self, key: &str, value: &str) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.entries.push((key.to_string(), value.to_string())),
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.retain(|(k, _)| k != key);
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Overwrites the credential triple. `region` and unknown keys stay.
    pub fn apply_credentials(&mut self, creds: &AwsCredentials) {
        self.set(ACCESS_KEY_ID, &creds.access_key_id);
        self.set(SECRET_ACCESS_KEY, &creds.secret_access_key);
        match &creds.session_token {
            Some(token) => self.set(SESSION_TOKEN, token),
            None => self.remove(SESSION_TOKEN),
        }
    }
}

/// Parse failure. Surfaces to callers as `INVALID_CREDENTIALS_FILE`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} at line {line}")]
pub struct ParseError {
    /// One of `EmptyProfile`, `EmptyKey`, `EmptyKeyValue`
    pub kind: ErrorCode,
    pub line: usize,
}

impl From<ParseError> for AppError {
    fn from(_: ParseError) -> Self {
        AppError::Validation(ErrorCode::InvalidCredentialsFile)
    }
}

pub fn parse(input: &str) -> Result<Vec<Profile>, ParseError> {
    let mut profiles: Vec<Profile> = Vec::new();

    for (idx, raw) in input.lines().enumerate() {
        let line = raw.trim();
        let fail = |kind| ParseError {
            kind,
            line: idx + 1,
        };

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') {
            let name = line[1..line.len() - 1].trim();
            if name.is_empty() {
                return Err(fail(ErrorCode::EmptyProfile));
            }
            profiles.push(Profile::new(name));
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() {
            return Err(fail(ErrorCode::EmptyKey));
        }
        if value.is_empty() {
            return Err(fail(ErrorCode::EmptyKeyValue));
        }

        // A key before any section header has no profile to live in
        let profile = profiles
            .last_mut()
            .ok_or_else(|| fail(ErrorCode::EmptyProfile))?;
        profile.set(key, value);
    }

    Ok(profiles)
}

pub fn serialize(profiles: &[Profile]) -> String {
    let mut out = String::new();
    for profile in profiles {
        out.push_str(&format!("[{}]\n", profile.name));
        for (key, value) in profile.entries() {
            out.push_str(&format!("{} = {}\n", key, value));
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_profiles() {
        let input = "\
# managed by hand
[default]
aws_access_key_id = AKIA1
aws_secret_access_key=secret1
region = eu-west-1

[staging]
aws_access_key_id = AKIA2
aws_secret_access_key = secret2
aws_session_token = token2
output = json
";
        let profiles = parse(input).unwrap();
        assert_eq!(profiles.len(), 2);

        assert_eq!(profiles[0].name, "default");
        assert_eq!(profiles[0].get(SECRET_ACCESS_KEY), Some("secret1"));
        assert_eq!(profiles[0].get(REGION), Some("eu-west-1"));
        assert_eq!(profiles[0].get(SESSION_TOKEN), None);

        assert_eq!(profiles[1].get(SESSION_TOKEN), Some("token2"));
        assert_eq!(profiles[1].get("output"), Some("json"));
    }

    #[test]
    fn test_value_may_contain_equals() {
        let profiles = parse("[p]\naws_session_token = abc==\n").unwrap();
        assert_eq!(profiles[0].get(SESSION_TOKEN), Some("abc=="));
    }

    #[test]
    fn test_empty_profile() {
        let err = parse("[ ]\naws_access_key_id = x\n").unwrap_err();
        assert_eq!(err.kind, ErrorCode::EmptyProfile);
        assert_eq!(err.line, 1);
    }

    #[test]
    fn test_empty_key() {
        let err = parse("[p]\n = value\n").unwrap_err();
        assert_eq!(err.kind, ErrorCode::EmptyKey);
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_empty_value() {
        let err = parse("[p]\naws_access_key_id =\n").unwrap_err();
        assert_eq!(err.kind, ErrorCode::EmptyKeyValue);
    }

    #[test]
    fn test_key_before_section() {
        let err = parse("aws_access_key_id = x\n[p]\n").unwrap_err();
        assert_eq!(err.kind, ErrorCode::EmptyProfile);
    }

    #[test]
    fn test_parse_error_surfaces_as_invalid_file() {
        let err: AppError = parse("[]").unwrap_err().into();
        assert_eq!(err, ErrorCode::InvalidCredentialsFile);
    }

    #[test]
    fn test_apply_credentials_keeps_region() {
        let mut profile = parse("[default]\naws_access_key_id = old\nregion = eu-west-1\naws_session_token = t\n")
            .unwrap()
            .remove(0);
        profile.apply_credentials(&AwsCredentials {
            access_key_id: "new".to_string(),
            secret_access_key: "s".to_string(),
            session_token: None,
        });

        assert_eq!(
            serialize(&[profile]),
            "[default]\naws_access_key_id = new\nregion = eu-west-1\naws_secret_access_key = s\n\n"
        );
    }
}
