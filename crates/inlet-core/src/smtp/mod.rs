//! SMTP front door
//!
//! Recipients are checked against the recipient directory at RCPT time and a
//! completed DATA payload is handed to an [`SmtpDelivery`]. One recipient is
//! accepted per transaction.

mod delivery;
mod directory;
mod handler;
mod server;

pub use delivery::{
    summarize, DeliveryError, DirectDelivery, Envelope, MessageSummary, QueuedDelivery,
    SmtpDelivery,
};
pub use directory::{PolicyDirectory, RecipientDirectory, RouteLookup};
pub use handler::{SessionSettings, SmtpHandler};
pub use server::SmtpServer;
