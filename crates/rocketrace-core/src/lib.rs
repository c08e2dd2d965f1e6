// Library root: race session core shared by every client front end.

pub mod config;
pub mod db;
pub mod feed;
pub mod model;
pub mod poll;
pub mod replicator;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;
