pub mod calculation;
pub mod payment;
pub mod service;
pub mod user;
