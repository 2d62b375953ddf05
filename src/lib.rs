pub mod camera;
pub mod chart;
pub mod display;
pub mod experiment_log;
pub mod frame_producer;
pub mod frame_queue;
pub mod monitor;
pub mod payload;
pub mod result_poller;
pub mod simulator;
pub mod types;

#[cfg(feature = "hardware")]
pub mod v4l_camera;
