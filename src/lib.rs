pub mod api;
pub mod config;
pub mod grouping;
pub mod model;
pub mod session;
pub mod shipping;
pub mod view_mode;
