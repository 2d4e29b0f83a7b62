//! Forest-disturbance alert harmonization and clumping.
//!
//! Heterogeneous alert products are normalised into one two-band
//! [`grid::AlertRaster`] (`alert` class + canonical `YYYY.DDD` date), cut into
//! tiles, clumped into sized vector patches and materialised as an
//! [`table::AlertTable`] that review and export collaborators consume.

pub mod aggregate;
pub mod config;
pub mod coords;
pub mod date;
pub mod drivers;
pub mod error;
pub mod export;
pub mod geometry;
pub mod geotiff;
pub mod grid;
pub mod jobs;
pub mod pipeline;
pub mod session;
pub mod source;
pub mod stats;
pub mod table;
pub mod telemetry;
pub mod temporal;
pub mod tiler;

pub use error::{AlertError, EditError, ExportError, Result};
pub use pipeline::{AlertQuery, Pipeline};
pub use session::{AlertSession, SessionEvent, SessionState};
pub use table::{AlertPatch, AlertTable, Mutation, Review};
