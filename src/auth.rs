//! Device authentication.
//!
//! A ThingsBoard device authenticates with exactly one of an access token or
//! basic MQTT credentials. [`AuthConfig`] can only be obtained through its
//! validating constructors and is immutable afterwards.

use alloc::string::String;

use crate::error::ConfigError;

/// Basic MQTT credentials as configured on the device profile.
///
/// Empty strings are treated the same as absent fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BasicCredentials {
    client_id: Option<String>,
    user_name: Option<String>,
    password: Option<String>,
}

impl BasicCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client_id(mut self, client_id: &str) -> Self {
        self.client_id = non_empty(client_id);
        self
    }

    pub fn with_user_name(mut self, user_name: &str) -> Self {
        self.user_name = non_empty(user_name);
        self
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = non_empty(password);
        self
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn user_name(&self) -> Option<&str> {
        self.user_name.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.password.is_some() && self.user_name.is_none() {
            return Err(ConfigError::PasswordWithoutUser);
        }
        if self.user_name.is_none() && self.client_id.is_none() {
            return Err(ConfigError::MissingIdentity);
        }
        Ok(())
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| String::from(value))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Method {
    AccessToken(String),
    Basic(BasicCredentials),
}

/// Validated authentication settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    method: Method,
}

/// The three CONNECT fields derived from an [`AuthConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials<'a> {
    pub client_id: &'a str,
    pub user_name: Option<&'a str>,
    pub password: Option<&'a str>,
}

impl AuthConfig {
    /// Access-token authentication.
    pub fn access_token(token: &str) -> Result<Self, ConfigError> {
        let token = non_empty(token).ok_or(ConfigError::MissingAuth)?;
        Ok(Self {
            method: Method::AccessToken(token),
        })
    }

    /// Basic-credentials authentication. Requires a client id or a user name,
    /// and a user name whenever a password is set.
    pub fn basic(credentials: BasicCredentials) -> Result<Self, ConfigError> {
        credentials.validate()?;
        Ok(Self {
            method: Method::Basic(credentials),
        })
    }

    /// Builds from optional settings, e.g. read from a configuration store,
    /// requiring exactly one of them.
    pub fn from_parts(
        access_token: Option<&str>,
        basic: Option<BasicCredentials>,
    ) -> Result<Self, ConfigError> {
        let access_token = access_token.filter(|token| !token.is_empty());
        match (access_token, basic) {
            (Some(_), Some(_)) => Err(ConfigError::ConflictingAuth),
            (Some(token), None) => Self::access_token(token),
            (None, Some(credentials)) => Self::basic(credentials),
            (None, None) => Err(ConfigError::MissingAuth),
        }
    }

    pub fn token(&self) -> Option<&str> {
        match &self.method {
            Method::AccessToken(token) => Some(token),
            Method::Basic(_) => None,
        }
    }

    pub fn basic_credentials(&self) -> Option<&BasicCredentials> {
        match &self.method {
            Method::AccessToken(_) => None,
            Method::Basic(credentials) => Some(credentials),
        }
    }

    /// CONNECT fields: a token travels as the user name with an empty client id.
    pub fn credentials(&self) -> Credentials<'_> {
        match &self.method {
            Method::AccessToken(token) => Credentials {
                client_id: "",
                user_name: Some(token),
                password: None,
            },
            Method::Basic(basic) => Credentials {
                client_id: basic.client_id().unwrap_or(""),
                user_name: basic.user_name(),
                password: basic.password(),
            },
        }
    }
}
