#![doc = "Run-loop scheduler and inter-thread messaging primitives."]

pub mod bus;
pub mod queue;
pub mod ring;
pub mod run_loop;

pub use bus::*;
pub use queue::*;
pub use ring::*;
pub use run_loop::*;
