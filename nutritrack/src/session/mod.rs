//! Session bridge between the browser's cookies and the backend.

mod client;
pub mod cookies;
mod factory;
mod logging;

pub use client::{SessionClient, SignUp};
pub use cookies::CookiePolicy;
pub use factory::ClientFactory;
