pub mod analysis;
pub mod contract;
pub mod quarter;
pub mod transcript;
