//! MongoDB connector for docscope.
//!
//! This crate implements [`StoreConnector`](docscope_core::backend::StoreConnector) and
//! [`StoreHandle`](docscope_core::backend::StoreHandle) on top of the official async driver.
//! Selectors and options are handed to the server untouched, so every query operator the
//! server understands is available when browsing.
//!
//! To use this connector, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! docscope = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Connection
//!
//! The connection string of each catalog connection is parsed as a MongoDB URI when a handle
//! is opened. Failures to parse it or to reach the deployment surface as
//! [`DocumentStoreError::StoreUnreachable`](docscope_core::error::DocumentStoreError::StoreUnreachable).
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use docscope::{backend::StoreConnectorBuilder, mongodb::MongoConnector};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connector = MongoConnector::builder()
//!         .with_app_name("docscope")
//!         .with_server_selection_timeout(Duration::from_secs(5))
//!         .build()
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docscope_mongodb;

pub mod store;

pub use store::{MongoConnector, MongoConnectorBuilder, MongoHandle};
