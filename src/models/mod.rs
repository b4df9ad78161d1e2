mod identity;
mod location;

pub use identity::CallerIdentity;
pub use location::{
    GeoPoint, LocationRecord, LocationUpdate, NearbyUser, validate_coordinates, validate_motion,
};
