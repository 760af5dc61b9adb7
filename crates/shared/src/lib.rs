pub mod amount;
pub mod config;
pub mod error;
pub mod models;

pub use amount::{lamports_to_sol, percent_of, sol_to_lamports, LAMPORTS_PER_SOL};
pub use config::Config;
pub use error::{Error, Result};
