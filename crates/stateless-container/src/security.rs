//! Security subjects and the permission-check seam.

use std::fmt;
use std::sync::Arc;

use crate::deployment::Deployment;

/// Principal name given to calls that carry no identity.
pub const ANONYMOUS: &str = "guest";

/// An authenticated identity with its roles.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subject {
    principal: Arc<str>,
    roles: Arc<[String]>,
}

impl Subject {
    /// Creates a subject.
    pub fn new<I, R>(principal: impl AsRef<str>, roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        let mut roles: Vec<String> = roles.into_iter().map(Into::into).collect();
        roles.sort();
        roles.dedup();
        Self {
            principal: Arc::from(principal.as_ref()),
            roles: roles.into(),
        }
    }

    /// The unauthenticated subject, with no roles.
    pub fn anonymous() -> Self {
        Self::new(ANONYMOUS, Vec::<String>::new())
    }

    /// Returns the principal name.
    #[inline]
    pub fn principal(&self) -> &str {
        &self.principal
    }

    /// Returns the roles, sorted.
    #[inline]
    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    /// Returns `true` if the subject is in `role`.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.binary_search_by(|r| r.as_str().cmp(role)).is_ok()
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.principal)
    }
}

/// Decides whether a subject may invoke a business method.
pub trait SecurityService: Send + Sync {
    /// Returns `true` if `subject` may call `method` on `deployment`.
    fn is_caller_authorized(&self, deployment: &Deployment, method: &str, subject: Option<&Subject>) -> bool;
}

/// Checks the subject's roles against the deployment's method permissions.
///
/// A method without declared permissions is unchecked. A method with
/// permissions requires the subject to hold at least one of the roles.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclaredRoles;

impl SecurityService for DeclaredRoles {
    fn is_caller_authorized(&self, deployment: &Deployment, method: &str, subject: Option<&Subject>) -> bool {
        match deployment.method_permissions(method) {
            None => true,
            Some(roles) => subject.is_some_and(|subject| roles.iter().any(|role| subject.has_role(role))),
        }
    }
}
