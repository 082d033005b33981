//! Plain-text node table.

use chrono::TimeDelta;
use meshsight_crawler::{NetworkMap, NodeAddress, ResourceKind};

const MISSING: &str = "-";

/// One table row.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub address: NodeAddress,
    pub application: Option<String>,
    pub version: Option<String>,
    pub uptime_days: Option<f64>,
}

/// Build rows for every node, in ascending address order.
///
/// Reads each node's uptime, which may issue a request.
pub async fn collect_rows(map: &mut NetworkMap) -> Vec<TableRow> {
    let mut rows = Vec::with_capacity(map.len());

    for node in map.nodes_mut() {
        let uptime_days = node
            .resource(ResourceKind::Uptime)
            .await
            .value
            .and_then(|v| v.as_f64());

        rows.push(TableRow {
            address: node.address(),
            application: node.application().map(str::to_string),
            version: node.firmware_version().map(str::to_string),
            uptime_days,
        });
    }

    rows
}

/// Format an uptime in days like `3 days, 4:05:06`.
pub fn format_uptime(days: f64) -> String {
    let Some(delta) = TimeDelta::try_seconds((days * 86_400.0).round() as i64) else {
        return MISSING.to_string();
    };

    format!(
        "{} days, {}:{:02}:{:02}",
        delta.num_days(),
        delta.num_hours() % 24,
        delta.num_minutes() % 60,
        delta.num_seconds() % 60
    )
}

/// Render rows as an aligned text table with a header line.
pub fn render_table(rows: &[TableRow]) -> String {
    let cells: Vec<[String; 4]> = rows
        .iter()
        .map(|row| {
            [
                row.address.to_string(),
                row.application.clone().unwrap_or_else(|| MISSING.to_string()),
                row.version.clone().unwrap_or_else(|| MISSING.to_string()),
                row.uptime_days
                    .map(format_uptime)
                    .unwrap_or_else(|| MISSING.to_string()),
            ]
        })
        .collect();

    let header = ["addr", "application", "version", "uptime"];
    let mut widths = header.map(str::len);
    for row in &cells {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let mut out = String::new();
    let mut push_line = |line: [&str; 4]| {
        out.push_str(&format!(
            "{:>w0$}  {:<w1$}  {:<w2$}  {}\n",
            line[0],
            line[1],
            line[2],
            line[3],
            w0 = widths[0],
            w1 = widths[1],
            w2 = widths[2],
        ));
    };

    push_line(header);
    for row in &cells {
        push_line([row[0].as_str(), row[1].as_str(), row[2].as_str(), row[3].as_str()]);
    }

    out
}
