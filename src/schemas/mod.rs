mod message_type;
pub use message_type::*;

pub mod messages;
pub use messages::*;

mod dag;
pub use dag::*;

mod record;
pub use record::*;

mod event;
pub use event::*;
