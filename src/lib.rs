//! Role-based access gate for path-prefixed routes.
//!
//! A [`policy::Gate`] is built once from a [`config::Config`] and then asked,
//! per request, whether to let it through or redirect it to the login or
//! unauthorized page. The session is read from a JSON cookie; anything
//! unreadable is treated as "no session".

pub mod audit;
pub mod cli;
pub mod config;
pub mod cookie;
pub mod policy;
pub mod role;
pub mod session;

pub use config::Config;
pub use policy::{Decision, Gate, PolicyTable, Request, RoutePolicy};
pub use role::Role;
pub use session::{Session, SessionCheck};
