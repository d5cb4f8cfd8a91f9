use crate::ids::ClientId;

/// Errors surfaced by hub operations.
///
/// Transport failures never appear here; they terminate the affected
/// connection at the socket edge. Mailbox errors mean the client has been (or
/// is being) retired; request errors are recoverable.
#[derive(Clone, Debug, thiserror::Error)]
pub enum HubError {
    #[error("client {client} is not registered")]
    NotRegistered { client: ClientId },
    #[error("mailbox full for client {client}")]
    MailboxFull { client: ClientId },
    #[error("mailbox closed for client {client}")]
    MailboxClosed { client: ClientId },
}

impl HubError {
    /// Whether the affected connection is done for — its mailbox saturated or
    /// already closed — as opposed to a recoverable request error.
    pub fn is_fatal_for_connection(&self) -> bool {
        matches!(self, Self::MailboxFull { .. } | Self::MailboxClosed { .. })
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::NotRegistered { .. } => "not_registered",
            Self::MailboxFull { .. } => "mailbox_full",
            Self::MailboxClosed { .. } => "mailbox_closed",
        }
    }
}
