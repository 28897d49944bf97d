pub mod abi;
pub mod engine;
pub mod limits;
