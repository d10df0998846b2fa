pub mod label;
pub mod note;
pub mod settings;
pub mod user;
