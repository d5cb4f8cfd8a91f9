pub mod errors;
pub mod ids;
pub mod messages;

pub use errors::HubError;
pub use ids::ClientId;
pub use messages::{BroadcastRequest, ClientRequest, ServerResponse, CODE_OK};
