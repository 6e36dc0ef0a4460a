use actix_web::{FromRequest, HttpMessage, HttpRequest, dev::Payload};
use futures::future::{Ready, ready};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{error::ApiError, model::role::Role};

/// Caller identity, placed in request extensions by `auth_middleware`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AuthUser {
    pub user_id: u64,
    pub username: String,
    #[schema(value_type = String, example = "employee")]
    pub role: Role,

    /// Present only if this user is linked to an employee record
    pub employee_id: Option<u64>,
}

impl FromRequest for AuthUser {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<AuthUser>()
                .cloned()
                .ok_or_else(|| ApiError::Unauthorized("Missing token".to_string())),
        )
    }
}

impl AuthUser {
    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.role == Role::Admin {
            Ok(())
        } else {
            Err(ApiError::forbidden("Admin only"))
        }
    }

    pub fn require_hr_or_admin(&self) -> Result<(), ApiError> {
        if self.role.is_hr_or_admin() {
            Ok(())
        } else {
            Err(ApiError::forbidden("HR/Admin only"))
        }
    }

    /// The employee record this account acts as.
    pub fn require_employee(&self) -> Result<u64, ApiError> {
        self.employee_id
            .ok_or_else(|| ApiError::forbidden("No employee profile"))
    }

    /// Employees may only see their own records; HR/Admin may see anyone's.
    pub fn can_view_employee(&self, employee_id: u64) -> bool {
        self.role.is_hr_or_admin() || self.employee_id == Some(employee_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: Role, employee_id: Option<u64>) -> AuthUser {
        AuthUser {
            user_id: 1,
            username: "u".to_string(),
            role,
            employee_id,
        }
    }

    #[test]
    fn role_gates() {
        assert!(user(Role::Admin, None).require_admin().is_ok());
        assert!(user(Role::Hr, None).require_admin().is_err());
        assert!(user(Role::Hr, None).require_hr_or_admin().is_ok());
        assert!(user(Role::Employee, Some(1)).require_hr_or_admin().is_err());
    }

    #[test]
    fn employee_link_and_visibility() {
        let emp = user(Role::Employee, Some(7));
        assert_eq!(emp.require_employee().unwrap(), 7);
        assert!(emp.can_view_employee(7));
        assert!(!emp.can_view_employee(8));

        let hr = user(Role::Hr, None);
        assert!(matches!(hr.require_employee(), Err(ApiError::Forbidden(_))));
        assert!(hr.can_view_employee(8));
    }
}
