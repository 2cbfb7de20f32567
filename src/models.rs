pub mod deposits;
pub mod referrals;
pub mod settings;
pub mod transactions;
pub mod users;
