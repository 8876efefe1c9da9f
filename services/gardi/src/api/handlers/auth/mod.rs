//! Authentication endpoints: register, login, refresh, logout, and the
//! Google federation pair.

pub mod google;
pub mod login;
pub mod logout;
pub mod refresh;
pub mod register;
pub mod types;
