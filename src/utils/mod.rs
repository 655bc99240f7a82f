pub mod cookie;
pub mod crypto;
