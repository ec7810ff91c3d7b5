mod budget_period;
mod lease;
mod usage;

pub use budget_period::*;
pub use lease::*;
pub use usage::*;
