pub mod service;
pub mod store;

pub use service::VelocityService;
pub use store::{MockVelocityStore, RedisVelocityStore, VelocityError, VelocityStore};
