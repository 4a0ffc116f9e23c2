pub mod bridge;
pub mod invoke;
pub mod local_store;
pub mod object_store;
pub mod secrets;
