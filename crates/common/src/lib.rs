// tandem-common: shared types and wire protocol for the Tandem workspace

pub mod protocol;
pub mod types;
