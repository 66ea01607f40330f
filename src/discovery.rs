//! The membership discovery contract.
//!
//! The watcher only ever asks one question: which addresses are healthy
//! for a named service right now. Backends answering that question —
//! consul, DNS, kubernetes endpoints — live outside the core; the crate
//! ships the static seed-list implementation used when an operator pins
//! the upstream set in configuration.

use std::error;
use std::fmt;

/// A discovery backend failure. The watcher logs these and keeps its
/// previous membership view.
#[derive(Debug)]
pub struct Error {
    message: String,
}

impl Error {
    pub fn new<S>(message: S) -> Error
    where
        S: Into<String>,
    {
        Error {
            message: message.into(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "discovery backend error: {}", self.message)
    }
}

impl error::Error for Error {
    fn description(&self) -> &str {
        &self.message
    }
}

/// Answers the healthy-members question for a named service. Addresses
/// returned must be reachable by the forwarder.
pub trait Discovery: Send {
    fn healthy_members(&mut self, service: &str) -> Result<Vec<String>, Error>;
}

/// A fixed member list from configuration. Ignores the service name and
/// never fails.
pub struct StaticDiscovery {
    members: Vec<String>,
}

impl StaticDiscovery {
    pub fn new(members: Vec<String>) -> StaticDiscovery {
        StaticDiscovery { members: members }
    }
}

impl Discovery for StaticDiscovery {
    fn healthy_members(&mut self, _service: &str) -> Result<Vec<String>, Error> {
        Ok(self.members.clone())
    }
}
