//! Looping audio-reactive particle trails: a procedural drum loop and a
//! scripted timeline drive a particle simulation whose trails are bloomed
//! and tone mapped every tick, live or offline.

pub mod audio;
pub mod compositor;
pub mod config;
pub mod cpu;
pub mod export;
pub mod gpu;
pub mod pipeline;
pub mod preset;
pub mod raster;
pub mod session;
pub mod sim;
pub mod timeline;
pub mod trail;
