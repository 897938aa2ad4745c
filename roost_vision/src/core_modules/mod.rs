pub mod adaptive_thresholds;
pub mod background_model;
pub mod contour_filter;
pub mod crop;
pub mod frame;
pub mod geometry;
pub mod mask_cleaner;
pub mod motion_detector;
pub mod preprocessor;
pub mod proximity;
pub mod region_consolidator;
pub mod region_layout;
pub mod tracker;
