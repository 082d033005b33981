//! Graphviz rendering of the discovered topology.

use meshsight_crawler::NetworkMap;

/// Render the neighbor graph as a `digraph net { ... }` block.
///
/// One `n<node> -> n<neighbor>` edge per reported neighbor; nodes without
/// neighbors contribute nothing.
pub fn render_dot(map: &NetworkMap) -> String {
    let mut out = String::from("digraph net {\n");
    for (from, to) in map.edges() {
        out.push_str(&format!("\tn{} -> n{}\n", from, to));
    }
    out.push_str("}\n");
    out
}
