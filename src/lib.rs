pub mod command_slot;
pub mod config;
pub mod device;
pub mod draft;
pub mod imagegen;
pub mod nlu;
pub mod paths;
pub mod preview;
pub mod reactions;
pub mod recording;
pub mod router;
pub mod screen;
pub mod store;
pub mod telemetry;
pub mod thread;
