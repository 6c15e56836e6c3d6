pub mod context;
pub mod metadata;
pub mod trigger;
