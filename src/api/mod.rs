pub mod attendance;
pub mod employee;
pub mod media;
pub mod profile_photo;
