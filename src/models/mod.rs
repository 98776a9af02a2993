pub mod channel;
pub mod message;
pub mod role;
pub mod user;
pub mod views;

pub use channel::{Channel, ChannelStatus, StatusFilter};
pub use message::{Message, SenderType};
pub use role::{Identity, Role, Viewer};
pub use user::{CustomerSummary, NewUser, User};
