use crate::api::attendance::{
    ClockEventResponse, ClockEventUpload, SessionListResponse,
};
use crate::api::employee::{CreateEmployee, EmployeeListResponse, EmployeeSort, SortOrder};
use crate::api::profile_photo::ProfilePhotoUpload;
use crate::auth::auth::AuthUser;
use crate::model::attendance::{AttendanceEvent, ClockAction, SessionState, SessionView};
use crate::model::department::Department;
use crate::model::employee::{Employee, EmployeeStatus};
use crate::model::job_title::JobTitle;
use crate::model::profile_photo::{ProfilePhoto, UserType};
use crate::models::{LoginReqDto, RegisterReq, TokenPair};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi, openapi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "HRM Workforce API",
        version = "1.0.0",
        description = r#"
## Workforce Management API

Backend for the employee directory, attendance and profile photo screens of an HR portal.

### 🔹 Key Features
- **Employee Directory**
  - Create, update, list (search, filter, sort, paginate), and view employee profiles
- **Attendance**
  - Clock in/out and one break per session, each event carrying location, network info and a camera photo
  - Current session and attendance history
- **Profile Photos**
  - Upload, fetch and remove an employee's photo; files served under `/media`

### 🔐 Security
Endpoints under `/api` require a **JWT Bearer** access token from `/auth/login`.
Writes to the directory are restricted to **HR** and **Admin** roles.

### 📦 Response Format
- JSON bodies; errors are `{"message": "..."}`
- Pagination on list endpoints

---
Built with **Rust**, **Actix Web**, **SQLx**, and **Utoipa**.
"#,
    ),
    paths(
        crate::auth::handlers::register,
        crate::auth::handlers::login,
        crate::auth::handlers::refresh_token,
        crate::auth::handlers::logout,
        crate::auth::handlers::me,

        crate::api::employee::create_employee,
        crate::api::employee::get_employee,
        crate::api::employee::list_employees,
        crate::api::employee::update_employee,
        crate::api::employee::delete_employee,
        crate::api::employee::list_departments,
        crate::api::employee::list_job_titles,

        crate::api::attendance::clock_in,
        crate::api::attendance::clock_out,
        crate::api::attendance::break_in,
        crate::api::attendance::break_out,
        crate::api::attendance::current_session,
        crate::api::attendance::list_sessions,
        crate::api::attendance::session_events,

        crate::api::profile_photo::upload_profile_photo,
        crate::api::profile_photo::get_profile_photo,
        crate::api::profile_photo::delete_profile_photo,

        crate::api::media::serve_media
    ),
    components(
        schemas(
            RegisterReq,
            LoginReqDto,
            TokenPair,
            AuthUser,
            CreateEmployee,
            Employee,
            EmployeeStatus,
            EmployeeSort,
            SortOrder,
            EmployeeListResponse,
            Department,
            JobTitle,
            ClockAction,
            SessionState,
            SessionView,
            AttendanceEvent,
            ClockEventUpload,
            ClockEventResponse,
            SessionListResponse,
            UserType,
            ProfilePhoto,
            ProfilePhotoUpload
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Auth", description = "Login, token rotation and registration"),
        (name = "Employee", description = "Employee directory APIs"),
        (name = "Attendance", description = "Clock-in/out and break tracking APIs"),
        (name = "Profile Photo", description = "Employee profile photo APIs"),
        (name = "Media", description = "Stored photo files"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}
