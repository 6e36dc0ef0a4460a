pub mod db_utils;
pub mod multipart;
pub mod storage;
pub mod username_index;
