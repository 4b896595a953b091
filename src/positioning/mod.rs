pub mod least_squares;

pub use least_squares::{initial_position, InitialiserMethod};
