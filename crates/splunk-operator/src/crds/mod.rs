pub mod common;
pub mod enterprise;
pub mod indexer;
pub mod license_master;
pub mod monitoring_console;
pub mod search_head;
pub mod spark;
pub mod standalone;
