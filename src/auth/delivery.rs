use async_trait::async_trait;
use thiserror::Error;

use crate::blockchain::account::Account;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Delivery timed out")]
    TimedOut,
}

/// Sends one-time codes to account holders
#[async_trait]
pub trait OtpDelivery: Send + Sync {
    async fn deliver(&self, account: &Account, code: &str) -> Result<(), DeliveryError>;
}

/// Prints codes to stdout. Development only.
#[derive(Debug, Default)]
pub struct ConsoleDelivery;

#[async_trait]
impl OtpDelivery for ConsoleDelivery {
    async fn deliver(&self, account: &Account, code: &str) -> Result<(), DeliveryError> {
        println!("--------------------------------------------------");
        println!("LOGIN OTP for {} <{}>: {}", account.full_name, account.email, code);
        println!("--------------------------------------------------");
        Ok(())
    }
}
