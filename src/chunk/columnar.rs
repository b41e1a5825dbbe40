//! Columnar segment encoding
//!
//! Re-encodes chunk rows into per-segment columns:
//! - Delta encoding for timestamps
//! - Raw f64 column for values
//! - Dictionary encoding for units
//! - JSON column for the open tag bag
//!
//! The segment key (device, metric type) is carried by the chunk index,
//! not repeated in the payload. Encoding must preserve exact row values
//! and row count; decode(encode(rows)) == rows.

use crate::error::{Result, WattlineError};
use crate::sample::MetricSample;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

fn need(buf: &impl Buf, bytes: usize, what: &str) -> Result<()> {
    if buf.remaining() < bytes {
        return Err(WattlineError::CorruptedChunk(format!(
            "segment truncated reading {what}"
        )));
    }
    Ok(())
}

/// Encode one segment of samples, ordered time descending
pub fn encode_samples(key_device: &str, key_metric: &str, rows: &[MetricSample]) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    buf.put_u32(rows.len() as u32);

    if rows.is_empty() {
        return Ok(buf.freeze());
    }

    // Timestamp column: first absolute, then deltas
    buf.put_i64(rows[0].time);
    let mut prev_ts = rows[0].time;
    for row in &rows[1..] {
        buf.put_i64(row.time - prev_ts);
        prev_ts = row.time;
    }

    // Value column
    for row in rows {
        buf.put_f64(row.value);
    }

    // Unit dictionary + per-row index
    let mut dict: Vec<&str> = Vec::new();
    let mut indices: Vec<u8> = Vec::with_capacity(rows.len());
    for row in rows {
        let idx = match dict.iter().position(|u| *u == row.unit) {
            Some(i) => i,
            None => {
                if dict.len() >= u8::MAX as usize {
                    return Err(WattlineError::CorruptedChunk(format!(
                        "segment ({key_device}, {key_metric}) has more than {} distinct units",
                        u8::MAX
                    )));
                }
                dict.push(&row.unit);
                dict.len() - 1
            }
        };
        indices.push(idx as u8);
    }
    buf.put_u16(dict.len() as u16);
    for unit in &dict {
        let unit_bytes = unit.as_bytes();
        buf.put_u16(unit_bytes.len() as u16);
        buf.put_slice(unit_bytes);
    }
    buf.put_slice(&indices);

    // Tag column
    let tags: Vec<&HashMap<String, String>> = rows.iter().map(|r| &r.tags).collect();
    let tag_json = serde_json::to_vec(&tags)?;
    buf.put_u32(tag_json.len() as u32);
    buf.put_slice(&tag_json);

    Ok(buf.freeze())
}

/// Decode a segment encoded by [`encode_samples`]
pub fn decode_samples(key_device: &str, key_metric: &str, data: &[u8]) -> Result<Vec<MetricSample>> {
    let mut buf = data;

    need(&buf, 4, "row count")?;
    let count = buf.get_u32() as usize;
    if count == 0 {
        return Ok(Vec::new());
    }

    need(&buf, 8 * count, "timestamp column")?;
    let mut timestamps = Vec::with_capacity(count);
    let first_ts = buf.get_i64();
    timestamps.push(first_ts);
    let mut prev_ts = first_ts;
    for _ in 1..count {
        prev_ts += buf.get_i64();
        timestamps.push(prev_ts);
    }

    need(&buf, 8 * count, "value column")?;
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        values.push(buf.get_f64());
    }

    need(&buf, 2, "unit dictionary size")?;
    let dict_len = buf.get_u16() as usize;
    let mut dict = Vec::with_capacity(dict_len);
    for _ in 0..dict_len {
        need(&buf, 2, "unit length")?;
        let len = buf.get_u16() as usize;
        need(&buf, len, "unit entry")?;
        let unit = String::from_utf8_lossy(&buf[..len]).to_string();
        buf.advance(len);
        dict.push(unit);
    }

    need(&buf, count, "unit index column")?;
    let mut units = Vec::with_capacity(count);
    for _ in 0..count {
        let idx = buf.get_u8() as usize;
        let unit = dict.get(idx).ok_or_else(|| {
            WattlineError::CorruptedChunk(format!("unit index {idx} out of range"))
        })?;
        units.push(unit.clone());
    }

    need(&buf, 4, "tag column length")?;
    let tag_len = buf.get_u32() as usize;
    need(&buf, tag_len, "tag column")?;
    let tags: Vec<HashMap<String, String>> = serde_json::from_slice(&buf[..tag_len])?;
    if tags.len() != count {
        return Err(WattlineError::CorruptedChunk(format!(
            "tag column has {} entries, expected {count}",
            tags.len()
        )));
    }

    let rows = timestamps
        .into_iter()
        .zip(values)
        .zip(units)
        .zip(tags)
        .map(|(((time, value), unit), tags)| MetricSample {
            time,
            device_id: key_device.to_string(),
            metric_type: key_metric.to_string(),
            value,
            unit,
            tags,
        })
        .collect();

    Ok(rows)
}

/// Encode a segment of serde rows as a JSON column
pub fn encode_json_rows<T: serde::Serialize>(rows: &[T]) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(rows)?))
}

/// Decode a segment encoded by [`encode_json_rows`]
pub fn decode_json_rows<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<Vec<T>> {
    Ok(serde_json::from_slice(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment_rows() -> Vec<MetricSample> {
        // Time descending, as the compressor hands them over
        vec![
            MetricSample::new("plug-1", "power", 3000, 30.5, "watts").with_tag("room", "kitchen"),
            MetricSample::new("plug-1", "power", 2000, 20.5, "watts"),
            MetricSample::new("plug-1", "power", 1000, 10.5, "watts").with_tag("room", "hall"),
        ]
    }

    #[test]
    fn test_samples_roundtrip() {
        let rows = segment_rows();
        let encoded = encode_samples("plug-1", "power", &rows).unwrap();
        let decoded = decode_samples("plug-1", "power", &encoded).unwrap();

        assert_eq!(decoded, rows);
    }

    #[test]
    fn test_empty_segment() {
        let encoded = encode_samples("plug-1", "power", &[]).unwrap();
        let decoded = decode_samples("plug-1", "power", &encoded).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_mixed_units() {
        let rows = vec![
            MetricSample::new("m", "energy", 2000, 2.0, "kwh"),
            MetricSample::new("m", "energy", 1000, 1.0, "wh"),
        ];
        let encoded = encode_samples("m", "energy", &rows).unwrap();
        let decoded = decode_samples("m", "energy", &encoded).unwrap();
        assert_eq!(decoded[0].unit, "kwh");
        assert_eq!(decoded[1].unit, "wh");
    }

    #[test]
    fn test_truncated_segment_rejected() {
        let rows = segment_rows();
        let encoded = encode_samples("plug-1", "power", &rows).unwrap();
        let truncated = &encoded[..encoded.len() / 2];

        let err = decode_samples("plug-1", "power", truncated).unwrap_err();
        assert!(matches!(err, WattlineError::CorruptedChunk(_)));
    }
}
