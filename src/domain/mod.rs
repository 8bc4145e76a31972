mod catalog;
mod ledger;
mod movement;
mod quantity;

pub use catalog::*;
pub use ledger::*;
pub use movement::*;
pub use quantity::*;
