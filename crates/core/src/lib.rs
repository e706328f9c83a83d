pub mod blender;
pub mod channels;
pub mod config;
pub mod controller;
pub mod frame;
pub mod interaction;
pub mod logging;
pub mod math;
pub mod model;
pub mod navigation;
pub mod noise;
pub mod port;
pub mod runner;
pub mod scenario;
pub mod sensor;
pub mod skeleton;
pub mod telemetry;
pub mod window;

pub use frame::{Character, CharacterStatus, TickOutcome, World};
pub use runner::{Backends, RunOptions, RunOutcome, run_scenario};
