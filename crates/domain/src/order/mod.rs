//! Order record and its status state machine.

mod model;
mod state;

pub use model::{Address, Order};
pub use state::{OrderStatus, Transition};
