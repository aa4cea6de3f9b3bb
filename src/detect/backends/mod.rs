pub mod scripted;
pub mod tracker;

pub use scripted::ScriptedBackend;
pub use tracker::IouTracker;
