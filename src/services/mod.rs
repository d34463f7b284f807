pub mod checkout;
pub mod orders;
pub mod paymob;
pub mod reconciliation;
