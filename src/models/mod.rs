// Models module - Database entity representations

pub mod auction;
pub mod bid;
pub mod notification;
pub mod participant;
pub mod user;

pub use auction::{Auction, AuctionStatus};
pub use bid::{Bid, BidStatus};
pub use notification::Notification;
pub use participant::{Participant, ParticipantStatus};
pub use user::User;
