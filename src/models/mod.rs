pub mod server;
pub mod subscription;
pub mod topic;

pub use server::*;
pub use subscription::*;
pub use topic::*;
