// Authentication module
//
// Two-step wallet login (key proof, then a one-time code) and the
// collaborator that delivers the codes.

pub mod delivery;
pub mod gateway;

pub use delivery::{ConsoleDelivery, OtpDelivery};
pub use gateway::{AuthError, AuthGateway};
