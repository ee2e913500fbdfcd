pub mod message;
pub mod notification;

pub use message::{Frame, SubscriptionMessage};
pub use notification::{Delivery, Notification};
