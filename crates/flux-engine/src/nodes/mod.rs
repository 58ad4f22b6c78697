//! Built-in node kinds

mod delay;
mod filter;
mod gain;
mod input;
mod master;
mod oscillator;
mod track_source;

pub use delay::*;
pub use filter::*;
pub use gain::*;
pub use input::*;
pub use master::*;
pub use oscillator::*;
pub use track_source::*;
