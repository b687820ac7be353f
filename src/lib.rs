pub mod tuning;
pub mod freq;
pub mod topology;
pub mod timing;
pub mod failsafe;
pub mod engine;
pub mod control;
pub mod apply;
pub mod sysfs;
pub mod event;

pub use apply::{apply_perf_state, ScalingWorker, SharedTargets};
pub use control::{ControlError, CpuControl, Recorder};
pub use engine::{Controller, Decision, FrameInput, Mode, Outcome};
pub use tuning::Config;
