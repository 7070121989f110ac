pub mod connections;
pub mod locations;
pub mod orders;
pub mod pending;
