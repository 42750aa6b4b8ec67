//! Remote engine credentials file
//!
//! Java-properties syntax:
//!
//! ```text
//! # comment
//! klab.username = alice
//! klab.token = 6f1c...
//! klab.engine.url = https://engine.example.org/modeler
//! ```

use crate::errors::EngineError;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

pub const USERNAME_KEY: &str = "klab.username";
pub const TOKEN_KEY: &str = "klab.token";
pub const PASSWORD_KEY: &str = "klab.password";
pub const ENGINE_URL_KEY: &str = "klab.engine.url";

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: Option<String>,
    pub token: String,
    pub engine_url: Option<String>,
}

impl Credentials {
    /// Read and parse a credentials file
    pub async fn load(path: &Path) -> Result<Self, EngineError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| EngineError::Credentials {
                message: format!("cannot read {}: {}", path.display(), e),
            })?;
        Self::parse(&text).map_err(|e| match e {
            EngineError::Credentials { message } => EngineError::Credentials {
                message: format!("{}: {}", path.display(), message),
            },
            other => other,
        })
    }

    pub fn parse(text: &str) -> Result<Self, EngineError> {
        let mut properties = parse_properties(text);

        let token = properties
            .remove(TOKEN_KEY)
            .or_else(|| properties.remove(PASSWORD_KEY))
            .filter(|t| !t.is_empty())
            .ok_or_else(|| EngineError::Credentials {
                message: format!("missing {} (or {})", TOKEN_KEY, PASSWORD_KEY),
            })?;

        Ok(Self {
            username: properties.remove(USERNAME_KEY).filter(|u| !u.is_empty()),
            token,
            engine_url: properties
                .remove(ENGINE_URL_KEY)
                .filter(|u| !u.is_empty())
                .map(|u| u.trim_end_matches('/').to_string()),
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("token", &"<redacted>")
            .field("engine_url", &self.engine_url)
            .finish()
    }
}

fn parse_properties(text: &str) -> HashMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('!'))
        .filter_map(|line| {
            let split = line.find(['=', ':'])?;
            let (key, value) = line.split_at(split);
            Some((key.trim().to_string(), value[1..].trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_full_file() {
        let creds = Credentials::parse(
            "# engine account\n\
             klab.username = alice\n\
             klab.token=abc123\n\
             ! legacy comment\n\
             klab.engine.url: https://engine.example.org/modeler/\n",
        )
        .unwrap();

        assert_eq!(creds.username.as_deref(), Some("alice"));
        assert_eq!(creds.token, "abc123");
        assert_eq!(creds.engine_url.as_deref(), Some("https://engine.example.org/modeler"));
    }

    #[test]
    fn test_password_is_accepted_as_token() {
        let creds = Credentials::parse("klab.username=bob\nklab.password=hunter2").unwrap();
        assert_eq!(creds.token, "hunter2");
        assert_eq!(creds.engine_url, None);
    }

    #[test]
    fn test_missing_token() {
        let err = Credentials::parse("klab.username=bob\n").unwrap_err();
        assert!(matches!(err, EngineError::Credentials { .. }));
    }

    #[test]
    fn test_debug_redacts_token() {
        let creds = Credentials::parse("klab.token=s3cret").unwrap();
        assert!(!format!("{:?}", creds).contains("s3cret"));
    }

    #[tokio::test]
    async fn test_load_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "klab.token=xyz").unwrap();

        let creds = Credentials::load(file.path()).await.unwrap();
        assert_eq!(creds.token, "xyz");

        let err = Credentials::load(Path::new("/nonexistent/creds.properties"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cannot read"));
    }
}
