//! Reservation and menu tools backed by the restaurant's GraphQL API.
//!
//! - `backend`: the GraphQL-over-HTTP client shared by every tool
//! - `reservation`: the six tool definitions and the registry builder

pub mod backend;
pub mod reservation;

pub use backend::BackendClient;
pub use reservation::{ReservationTool, reservation_registry};
