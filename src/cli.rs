//! CLI domain: parse, route, output and presentation only.
//! Route handlers drive a [`ContextProvider`](crate::context::ContextProvider);
//! all persistence behavior lives in the library.

mod output;
mod parse;
mod presentation;
mod route;

pub use output::map_error;
pub use parse::{Cli, Commands, OutputFormat};
pub use route::RunContext;
