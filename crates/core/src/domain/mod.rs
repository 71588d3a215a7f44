pub mod contract;
pub mod observation;
pub mod prediction;
