pub mod attendance;
pub mod core;
pub mod courses;
pub mod finance;
pub mod grades;
pub mod people;
pub mod reports;
pub mod roster;
