pub mod legacy;
pub mod node;
pub mod predict;
pub mod retry;
pub mod rpc;
pub mod store;
pub mod walk;
