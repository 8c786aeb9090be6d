// API处理器模块

pub mod connector;
pub mod health;

pub use connector::{connector_get, connector_post, parse_range, ConnectorForm, ConnectorQuery};
pub use health::health_check;
