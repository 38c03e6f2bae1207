//! Authentication strategies, tokens, identities and the token/authorization flow.

mod flow;
mod identity;
mod strategy;

pub use flow::AuthenticationFlow;
pub use identity::{Entitlement, Identity, Token};
pub use strategy::{
    ApplicationCredential, AuthMode, AuthStrategy, DirectoryService, ManualUserApplication,
    OsLogon, UserAndApplication,
};
