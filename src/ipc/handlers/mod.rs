pub mod attempts;
pub mod auth;
pub mod concepts;
pub mod core;
pub mod generate;
pub mod grades;
pub mod levels;
pub mod questions;
pub mod secrets;
pub mod stats;
pub mod sub_units;
pub mod subjects;
pub mod units;
pub mod users;
