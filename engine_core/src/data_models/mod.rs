pub mod analysis;
pub mod competitor;
pub mod contact;
pub mod menu;
pub mod record;
