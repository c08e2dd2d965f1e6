// Library root: re-exports modules for integration tests and the binary.

pub mod app;
pub mod console;
pub mod graphql;
pub mod graphql_ws;
pub mod protocol;
