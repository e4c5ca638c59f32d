pub mod opa_client;
pub mod policy;

pub use opa_client::*;
pub use policy::*;
