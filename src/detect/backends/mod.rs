pub mod synthetic;
#[cfg_attr(not(feature = "backend-tract"), allow(dead_code))]
pub mod yolo;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use synthetic::SyntheticEngine;

#[cfg(feature = "backend-tract")]
pub use tract::YoloEngine;
