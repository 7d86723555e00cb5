pub mod assets;
pub mod auth;
pub mod backup_exchange;
pub mod books;
pub mod classes;
pub mod core;
pub mod payments;
pub mod sessions;
pub mod students;
