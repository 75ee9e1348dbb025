//! Thin InfluxDB line-protocol HTTP adapter.
//!
//! Deliberately minimal: no connection pooling beyond what `reqwest`'s
//! client already gives for free, no retries. The concrete driver is an
//! external collaborator, not where this workspace's engineering lives.

use crate::error::StoreError;
use crate::model::{FieldValue, Point};

pub struct InfluxStore {
    client: reqwest::Client,
    base_url: String,
    database: String,
}

impl InfluxStore {
    pub fn new(host: &str, port: u16, database: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(5))
                .build()
                .expect("failed to build reqwest client"),
            base_url: format!("http://{host}:{port}"),
            database: database.into(),
        }
    }

    pub async fn write_points(&self, points: Vec<Point>) -> Result<(), StoreError> {
        if points.is_empty() {
            return Ok(());
        }
        let body = points
            .iter()
            .map(to_line_protocol)
            .collect::<Vec<_>>()
            .join("\n");

        let resp = self
            .client
            .post(format!("{}/write", self.base_url))
            .query(&[("db", self.database.as_str())])
            .body(body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(StoreError::Backend(format!(
                "influx write failed: {}",
                resp.status()
            )));
        }
        Ok(())
    }

    pub async fn query_range(
        &self,
        measurement: &str,
        device: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<Point>, StoreError> {
        let influx_ql = format!(
            "SELECT * FROM \"{measurement}\" WHERE \"device\" = '{device}' AND time >= {start}ms AND time <= {end}ms",
        );
        let resp = self
            .client
            .get(format!("{}/query", self.base_url))
            .query(&[("db", self.database.as_str()), ("q", influx_ql.as_str())])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(StoreError::Backend(format!(
                "influx query failed: {}",
                resp.status()
            )));
        }

        let body: serde_json::Value = resp.json().await?;
        Ok(parse_query_response(&body, measurement, device))
    }

    pub async fn latest_clean_timestamp(&self, device: &str) -> Result<Option<i64>, StoreError> {
        let influx_ql = format!(
            "SELECT \"rr_clean\" FROM \"{}\" WHERE \"device\" = '{device}' AND \"rr_clean\" != '' ORDER BY time DESC LIMIT 1",
            crate::model::measurement::RAW,
        );
        let resp = self
            .client
            .get(format!("{}/query", self.base_url))
            .query(&[("db", self.database.as_str()), ("q", influx_ql.as_str())])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(StoreError::Backend(format!(
                "influx query failed: {}",
                resp.status()
            )));
        }
        let body: serde_json::Value = resp.json().await?;
        let points = parse_query_response(&body, crate::model::measurement::RAW, device);
        Ok(points.first().map(|p| p.timestamp))
    }
}

fn to_line_protocol(point: &Point) -> String {
    let tags: String = point
        .tags
        .iter()
        .map(|(k, v)| format!(",{}={}", escape(k), escape(v)))
        .collect();
    let fields: String = point
        .fields
        .iter()
        .map(|(k, v)| format!("{}={}", escape(k), field_literal(v)))
        .collect::<Vec<_>>()
        .join(",");
    format!(
        "{}{} {} {}",
        escape(&point.measurement),
        tags,
        fields,
        point.timestamp * 1_000_000, // ms -> ns, Influx's default write precision
    )
}

fn field_literal(v: &FieldValue) -> String {
    match v {
        FieldValue::Float(f) => format!("{f}"),
        FieldValue::Int(i) => format!("{i}i"),
        FieldValue::Bool(b) => b.to_string(),
        FieldValue::Str(s) => format!("\"{}\"", s.replace('"', "\\\"")),
    }
}

fn escape(s: &str) -> String {
    s.replace(' ', "\\ ").replace(',', "\\,").replace('=', "\\=")
}

/// Parses InfluxQL's `{"results":[{"series":[{"columns":[...],"values":[[...]]}]}]}`
/// response shape into `Point`s tagged with `device`.
fn parse_query_response(body: &serde_json::Value, measurement: &str, device: &str) -> Vec<Point> {
    let mut out = Vec::new();
    let Some(series) = body
        .get("results")
        .and_then(|r| r.get(0))
        .and_then(|r| r.get("series"))
        .and_then(|s| s.as_array())
    else {
        return out;
    };

    for s in series {
        let Some(columns) = s.get("columns").and_then(|c| c.as_array()) else {
            continue;
        };
        let Some(values) = s.get("values").and_then(|v| v.as_array()) else {
            continue;
        };
        for row in values {
            let Some(row) = row.as_array() else { continue };
            let mut point = Point::new(measurement, 0).with_tag("device", device);
            for (col, val) in columns.iter().zip(row) {
                let Some(name) = col.as_str() else { continue };
                if name == "time" {
                    if let Some(ts) = val.as_i64() {
                        point.timestamp = ts / 1_000_000;
                    }
                    continue;
                }
                let field = if let Some(f) = val.as_f64() {
                    FieldValue::Float(f)
                } else if let Some(s) = val.as_str() {
                    FieldValue::Str(s.to_string())
                } else if let Some(b) = val.as_bool() {
                    FieldValue::Bool(b)
                } else {
                    continue;
                };
                point.fields.insert(name.to_string(), field);
            }
            out.push(point);
        }
    }
    out
}
