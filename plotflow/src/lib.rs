//! Compute core of an interactive tiled 2-D line plotter.
//!
//! The host ingests line data once ([`Plotter::add_rectangular_line_data`],
//! [`Plotter::add_freeform_line_data`]), then streams tile requests at the
//! plotter as the user pans, zooms, hovers, and toggles items. Each request
//! is deduplicated against the in-flight set, split into a parallel
//! intersection-finding phase and a parallel painting phase on the work
//! pool, and answered through the host message callback with PNG-filtered
//! tile bytes plus a per-pixel item-id hovermap.
//!
//! The crate is deliberately transport-free: messages are key=value fields
//! plus named binary blobs, PNG DEFLATE is delegated to the host, and the
//! host owns the thread that calls in.

pub mod array;
pub mod canvas;
pub mod clock;
pub mod error;
pub mod figure;
pub mod irs;
pub mod message;
pub mod plotter;
pub mod selection;

pub use array::{ArrayError, DataArray, ElementType};
pub use canvas::{CanvasConfig, TileKey, Transform, TILE_SIZE, ZOOM_FACTOR};
pub use clock::{ManualClock, MonotonicClock, TimeSource};
pub use error::PlotError;
pub use figure::{FigureData, PlotRequest, Range2D};
pub use irs::{IntersectionResult, IntersectionResultSet, STRIP_SZ};
pub use message::{MessageCallback, MessageData, OutgoingMessage};
pub use plotter::{Plotter, TileCoord, TILE_ACK_EXPIRE_US};
pub use selection::SelectionMap;
