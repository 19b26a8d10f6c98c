//! Wire types for the conversational agent session.
//!
//! Only the control surface the orchestrator drives and the server events the
//! agent adapter consumes are modelled here.

pub mod audio;
pub mod events;
pub mod session;
mod content;

pub use content::items::Item;
pub use content::message::*;
pub use events::{ClientEvent, ServerEvent};
pub use session::{Session, SessionConfigurator};
