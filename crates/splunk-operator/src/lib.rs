pub mod apply;
pub mod config;
pub mod controller;
pub mod crds;
pub mod dependencies;
pub mod enterprise_controller;
pub mod error;
pub mod graph;
pub mod indexer_controller;
pub mod instance;
pub mod license_master_controller;
pub mod metrics;
pub mod monitoring_console_controller;
pub mod resources;
pub mod search_head_controller;
pub mod secrets;
pub mod spark_controller;
pub mod standalone_controller;
pub mod store;
pub mod validate;
