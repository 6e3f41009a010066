// Services module - Business logic

pub mod auctions;
pub mod bidding;
pub mod clock;
pub mod lifecycle;
pub mod notifier;
