//! Mail transports implementing the `Mailer` port.

pub mod http;
pub mod log;

pub use self::http::{HttpMailer, HttpMailerConfig};
pub use self::log::LogMailer;
