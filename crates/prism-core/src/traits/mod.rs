//! Collaborator trait definitions

mod command;
mod logger;

pub use command::Command;
pub use logger::Logger;
