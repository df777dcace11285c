//! # Strongbox
//!
//! Multi-tenant file vault core: each principal owns a private, isolated
//! storage namespace, and files can be selectively shared with other
//! principals or directory groups at one of three graduated permission
//! levels (read < write < full).
//!
//! The crate is the access-control and path-virtualization engine only.
//! Directory-service authentication, token issuance, HTTP routing, and
//! audit persistence are external collaborators.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use strongbox::audit::TracingAuditSink;
//! use strongbox::catalog::SqliteCatalog;
//! use strongbox::config::VaultConfig;
//! use strongbox::vault::Vault;
//!
//! let config = VaultConfig::default();
//! let catalog = Arc::new(SqliteCatalog::new(config.db_path())?);
//! catalog.initialize()?;
//! let vault = Vault::new(&config, catalog, Arc::new(TracingAuditSink))?;
//! ```

pub mod access;
pub mod audit;
pub mod catalog;
pub mod config;
pub mod error;
pub mod identity;
pub mod paths;
pub mod types;
pub mod vault;
