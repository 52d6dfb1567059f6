mod contact;
mod ledger;
mod primitives;
mod route;

pub use contact::*;
pub use ledger::*;
pub use primitives::*;
pub use route::*;
