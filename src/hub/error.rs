//! Hub error types

use crate::session::InvalidTransition;

use super::entry::ClientId;

/// Error type for hub operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubError {
    /// No client registered under this id
    ClientNotFound(ClientId),
    /// A client with this id is already registered
    ClientAlreadyRegistered(ClientId),
    /// The client's queue has been closed
    ClientClosed(ClientId),
    /// The client stayed saturated past the overflow timeout
    QueueOverflow(ClientId),
    /// The request does not fit the client's session state
    InvalidTransition(InvalidTransition),
}

impl std::fmt::Display for HubError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HubError::ClientNotFound(id) => write!(f, "Client not found: {}", id),
            HubError::ClientAlreadyRegistered(id) => {
                write!(f, "Client already registered: {}", id)
            }
            HubError::ClientClosed(id) => write!(f, "Client closed: {}", id),
            HubError::QueueOverflow(id) => write!(f, "Client queue overflow: {}", id),
            HubError::InvalidTransition(t) => write!(f, "Invalid transition: {}", t),
        }
    }
}

impl std::error::Error for HubError {}

impl From<InvalidTransition> for HubError {
    fn from(t: InvalidTransition) -> Self {
        HubError::InvalidTransition(t)
    }
}
