use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::message::element_names;
use crate::request::Request;
use crate::utils::{AuthError, DecodeError};

/// Produces the authentication options string consumed when connecting.
///
/// Every variant differs only in that string; the manual strategy additionally fills
/// the authorization request with the user it vouches for.
pub trait AuthStrategy: fmt::Debug + Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &'static str;

    /// Options string, `None` when no authentication options are sent.
    fn options(&self) -> Option<String>;

    /// Adds strategy specific elements to an authorization request.
    fn decorate_authorization(&self, _request: &mut Request) -> Result<(), DecodeError> {
        Ok(())
    }
}

const APP_KEY: &str = "ApplicationAuthenticationType=APPNAME_AND_KEY";

/// Authenticates as the logged on OS user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OsLogon;

impl AuthStrategy for OsLogon {
    fn name(&self) -> &'static str {
        "OS_LOGON"
    }

    fn options(&self) -> Option<String> {
        Some("AuthenticationType=OS_LOGON".to_string())
    }
}

/// Authenticates an application by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationCredential {
    /// Registered application name
    pub application: String,
}

impl AuthStrategy for ApplicationCredential {
    fn name(&self) -> &'static str {
        "APPLICATION"
    }

    fn options(&self) -> Option<String> {
        Some(format!(
            "AuthenticationMode=APPLICATION_ONLY;{};ApplicationName={}",
            APP_KEY, self.application
        ))
    }
}

/// Authenticates the user through a directory service property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryService {
    /// Directory service property name
    pub property: String,
}

impl AuthStrategy for DirectoryService {
    fn name(&self) -> &'static str {
        "DIRECTORY_SERVICE"
    }

    fn options(&self) -> Option<String> {
        Some(format!(
            "AuthenticationType=DIRECTORY_SERVICE;DirSvcPropertyName={}",
            self.property
        ))
    }
}

/// Authenticates both the user and the application.
///
/// The user is identified by OS logon, or by a directory service property when one is
/// given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAndApplication {
    /// Registered application name
    pub application: String,
    /// Directory service property, `None` for OS logon
    pub directory: Option<String>,
}

impl AuthStrategy for UserAndApplication {
    fn name(&self) -> &'static str {
        match self.directory {
            Some(_) => "USER_DS_APP",
            None => "USER_APP",
        }
    }

    fn options(&self) -> Option<String> {
        let user = match &self.directory {
            Some(property) => format!(
                "AuthenticationType=DIRECTORY_SERVICE;DirSvcPropertyName={}",
                property
            ),
            None => "AuthenticationType=OS_LOGON".to_string(),
        };
        Some(format!(
            "AuthenticationMode=USER_AND_APPLICATION;{};{};ApplicationName={}",
            user, APP_KEY, self.application
        ))
    }
}

/// Application authentication where the application vouches for a user it identified
/// itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualUserApplication {
    /// Registered application name
    pub application: String,
    /// User the application vouches for
    pub user_id: String,
    /// Address the user connects from
    pub ip_address: String,
}

impl AuthStrategy for ManualUserApplication {
    fn name(&self) -> &'static str {
        "MANUAL"
    }

    fn options(&self) -> Option<String> {
        Some(format!(
            "AuthenticationMode=USER_AND_APPLICATION;AuthenticationType=MANUAL;{};ApplicationName={}",
            APP_KEY, self.application
        ))
    }

    fn decorate_authorization(&self, request: &mut Request) -> Result<(), DecodeError> {
        request.set(element_names::USER_ID, self.user_id.as_str())?;
        request.set(element_names::IP_ADDRESS, self.ip_address.as_str())
    }
}

/// Authentication modes selectable from configuration or the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// No authentication options
    None,
    /// OS logon
    Logon,
    /// Application only
    Application,
    /// Directory service
    DirectoryService,
    /// OS logon user plus application
    UserApplication,
    /// Directory service user plus application
    UserDirectoryApplication,
    /// Application vouching for a user
    Manual,
}

impl FromStr for AuthMode {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NONE" => Ok(AuthMode::None),
            "LOGON" => Ok(AuthMode::Logon),
            "APPLICATION" | "APP" => Ok(AuthMode::Application),
            "DIRSVC" => Ok(AuthMode::DirectoryService),
            "USER_APP" => Ok(AuthMode::UserApplication),
            "USER_DS_APP" => Ok(AuthMode::UserDirectoryApplication),
            "MANUAL" => Ok(AuthMode::Manual),
            other => Err(AuthError::InvalidStrategy(format!(
                "unknown authentication mode '{}'",
                other
            ))),
        }
    }
}

impl AuthMode {
    /// Builds the strategy for this mode.
    ///
    /// `name` is the application name, or the directory property for `DirectoryService`.
    /// `directory` is the directory property for `UserDirectoryApplication`.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidStrategy`] when a required name is missing. `Manual` always
    /// fails here because it needs a user id and address; build
    /// [`ManualUserApplication`] directly.
    pub fn strategy(
        self,
        name: Option<&str>,
        directory: Option<&str>,
    ) -> Result<Option<Arc<dyn AuthStrategy>>, AuthError> {
        let required = |value: Option<&str>, what: &str| {
            value
                .filter(|v| !v.trim().is_empty())
                .map(str::to_string)
                .ok_or_else(|| AuthError::InvalidStrategy(format!("{:?} requires {}", self, what)))
        };
        let strategy: Arc<dyn AuthStrategy> = match self {
            AuthMode::None => return Ok(None),
            AuthMode::Logon => Arc::new(OsLogon),
            AuthMode::Application => Arc::new(ApplicationCredential {
                application: required(name, "an application name")?,
            }),
            AuthMode::DirectoryService => Arc::new(DirectoryService {
                property: required(name.or(directory), "a directory property")?,
            }),
            AuthMode::UserApplication => Arc::new(UserAndApplication {
                application: required(name, "an application name")?,
                directory: None,
            }),
            AuthMode::UserDirectoryApplication => Arc::new(UserAndApplication {
                application: required(name, "an application name")?,
                directory: Some(required(directory, "a directory property")?),
            }),
            AuthMode::Manual => {
                return Err(AuthError::InvalidStrategy(
                    "MANUAL requires a user id and IP address".to_string(),
                ));
            }
        };
        Ok(Some(strategy))
    }
}
