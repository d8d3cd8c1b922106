pub mod capture;
pub mod container;
pub mod coordinator;
pub mod runner;
pub mod validator;

pub use coordinator::Coordinator;
