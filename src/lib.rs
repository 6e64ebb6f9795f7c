pub mod container;
pub mod db;
pub mod error;
pub mod json_schema;
pub mod manifest;
pub mod progress;
pub mod restore;
pub mod row;
pub mod schema;
pub mod slice;
pub mod snapshot;
pub mod transform;
