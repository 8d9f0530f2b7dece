//! HTTP layer: Axum router, session gate, pages and the JSON API.
//!
//! Every route sits behind [`gate::session_gate`]. Public paths come from the
//! [`crate::routes::RouteTable`]; everything else needs a signed-in user.

mod auth;
mod error;
mod gate;
mod handlers;
mod pages;
mod responses;
mod state;

#[cfg(test)]
mod tests;

pub use handlers::router;
pub use state::AppState;
