//! Infrastructure layer: job queue, order storage, mail transports.

pub mod jobs;
pub mod mail;
pub mod notifications;
pub mod orders;
