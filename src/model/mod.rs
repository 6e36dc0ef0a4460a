pub mod attendance;
pub mod department;
pub mod employee;
pub mod job_title;
pub mod profile_photo;
pub mod role;
