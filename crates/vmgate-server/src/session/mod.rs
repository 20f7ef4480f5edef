//! Session lifecycle: create, stop, inspect.

pub mod manager;

pub use manager::SessionManager;
