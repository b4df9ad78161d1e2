pub mod history;
pub mod location;
