#![cfg_attr(not(test), no_std)]

// Declared first: the macros are textually scoped.
#[macro_use]
mod log;

pub mod bridge;
pub mod control;
pub mod descriptor;
pub mod device;
pub mod midi;
pub mod midi_constants;
pub mod synth;

#[cfg(test)]
mod mock;
