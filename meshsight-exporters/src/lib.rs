//! Exporters for meshsight crawls.
//!
//! Each exporter consumes a finished [`NetworkMap`](meshsight_crawler::NetworkMap):
//!
//! - [`table`] - aligned text table of addresses, applications, versions and uptimes
//! - [`dot`] - Graphviz `digraph` of the neighbor relation
//! - [`munin`] - per-resource Munin configuration and value files, with stale-file cleanup
//! - [`snapshot`] - JSON document of every node and reading
//!
//! Exporters that need resource values read them lazily from the nodes, so
//! they take the map mutably and may talk to the mesh.

pub mod dot;
pub mod error;
pub mod munin;
pub mod snapshot;
pub mod table;

pub use dot::render_dot;
pub use error::ExportError;
pub use munin::{MuninExporter, MuninReport};
pub use snapshot::{MapSnapshot, NodeSnapshot, take_snapshot, to_json};
pub use table::{TableRow, collect_rows, render_table};
