pub mod match_result;
pub mod physics;
pub mod session;
pub mod settings;
