pub mod densify;
pub mod distance;
pub mod projection;
