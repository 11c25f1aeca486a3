pub mod logging;
pub mod wallets;
