//! `SQLite` database for the portal server.

pub use toolport_core::db::DatabaseError;

toolport_core::define_database!(PortalDatabase, "Portal database migrations complete");
