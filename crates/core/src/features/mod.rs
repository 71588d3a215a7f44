pub mod assembler;
pub mod encoder;
pub mod lags;
pub mod schema;
