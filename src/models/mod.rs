pub mod endpoint;
pub mod token;
pub mod user;

pub use endpoint::EndpointRecord;
pub use token::{AuthType, TokenKey, TokenOwner, TokenRecord};
pub use user::{ConnectedUser, LoginResponse, LogoutResponse};
