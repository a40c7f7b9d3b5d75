//! Session credential triple and its stream-code form

/// Credentials that identify one watch session on the transport.
///
/// `community` and `password` select the rendezvous group, `key` the session
/// inside it. None of them may be empty.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Credentials {
    pub community: String,
    pub password: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialsError {
    #[error("This stream code is invalid: expected community:password:key, got {parts} part(s)")]
    WrongPartCount { parts: usize },

    #[error("This stream code is invalid: the {field} is empty")]
    EmptyPart { field: &'static str },
}

impl Credentials {
    pub fn new(
        community: impl Into<String>,
        password: impl Into<String>,
        key: impl Into<String>,
    ) -> Result<Self, CredentialsError> {
        let credentials = Self {
            community: community.into(),
            password: password.into(),
            key: key.into(),
        };

        for (field, value) in [
            ("community", &credentials.community),
            ("password", &credentials.password),
            ("key", &credentials.key),
        ] {
            if value.trim().is_empty() {
                return Err(CredentialsError::EmptyPart { field });
            }
        }

        Ok(credentials)
    }

    /// The `community:password:key` code peers use to join
    pub fn stream_code(&self) -> String {
        self.to_string()
    }
}

impl std::fmt::Display for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.community, self.password, self.key)
    }
}

impl std::str::FromStr for Credentials {
    type Err = CredentialsError;

    fn from_str(code: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = code.trim().split(':').collect();
        let [community, password, key] = parts.as_slice() else {
            return Err(CredentialsError::WrongPartCount { parts: parts.len() });
        };

        Credentials::new(*community, *password, *key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stream_code() {
        let credentials: Credentials = "kz3:p9q:x1y".parse().unwrap();
        assert_eq!(credentials.community, "kz3");
        assert_eq!(credentials.password, "p9q");
        assert_eq!(credentials.key, "x1y");
        assert_eq!(credentials.stream_code(), "kz3:p9q:x1y");
    }

    #[test]
    fn test_reject_two_parts() {
        let err = "a:b".parse::<Credentials>().unwrap_err();
        assert_eq!(err, CredentialsError::WrongPartCount { parts: 2 });
    }

    #[test]
    fn test_reject_four_parts() {
        assert!("a:b:c:d".parse::<Credentials>().is_err());
    }

    #[test]
    fn test_reject_empty_part() {
        let err = "a::c".parse::<Credentials>().unwrap_err();
        assert_eq!(err, CredentialsError::EmptyPart { field: "password" });
    }
}
