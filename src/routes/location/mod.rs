mod handler;
mod model;

pub use handler::{find_nearby_users, my_location, update_location};
