//! Semantic territory maps for collections of short notes.
//!
//! Notes are embedded, grouped by meaning with k-means in cosine space, named
//! by a label service (or a keyword heuristic when none is available), and
//! laid out on a 2D canvas. The canvas is then divided into territories: one
//! Voronoi cell per cluster, with density contours drawn over the points.
//!
//! # Pipeline
//!
//! | Stage | Module | Output |
//! |-------|--------|--------|
//! | Embed | [`embedding`] | one vector per note, cached in SQLite |
//! | Group | [`cluster`] | clusters and sub-clusters |
//! | Name | [`label`] | short topic labels |
//! | Place | [`layout`] | 2D canvas positions |
//! | Divide | [`territory`] | weights, contours, tessellation, [`territory::locate`] |
//!
//! # Modules
//!
//! - [`config`]: TOML config with environment overrides
//! - [`db`]: SQLite setup for the embedding cache

pub mod cluster;
pub mod config;
pub mod db;
pub mod embedding;
pub mod label;
pub mod layout;
pub mod territory;
