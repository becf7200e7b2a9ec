//! Connector service — registry of backend connectors, encrypted
//! connection descriptor store, and capability dispatch (test / metadata /
//! schema) behind a small REST API.

pub mod api;
pub mod config;
pub mod connector;
pub mod crypto;
pub mod dispatch;
pub mod entity;
pub mod repository;
