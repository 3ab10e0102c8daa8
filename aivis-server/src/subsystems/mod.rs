pub mod generate;
pub mod monitor;
pub mod notify;
pub mod paa;
pub mod scheduler;
