pub mod hub;
pub mod intake;

pub use hub::Hub;
pub use intake::{intake_channel, spawn_intake, start_intake, Publisher};
