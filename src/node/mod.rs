pub mod db;

pub use db::{AccountState, ChainDb, StoreError};
