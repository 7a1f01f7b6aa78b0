#![allow(dead_code)]

use popstate::format::{MAGIC_BYTES, to_hex_field};
use serde_json::{Value, json};

/// Frames `header` and `chunks` into a complete file.
pub fn frame(header: &Value, chunks: &[Vec<u8>]) -> Vec<u8> {
    let text = serde_json::to_string(header).unwrap_or_default();
    let mut bytes = MAGIC_BYTES.to_vec();
    bytes.extend_from_slice(format!("{:>12}", text.len()).as_bytes());
    bytes.extend_from_slice(text.as_bytes());
    for chunk in chunks {
        bytes.extend_from_slice(chunk);
    }
    bytes
}

pub fn human(id: u64) -> Value {
    json!({"suid": {"id": id}, "m_age": id as f64 * 10.0, "m_is_infected": false})
}

pub fn humans(ids: std::ops::Range<u64>) -> Vec<Value> {
    ids.map(human).collect()
}

pub fn collection(records: &[Value]) -> Vec<u8> {
    serde_json::to_vec(&json!({"human_collection": records})).unwrap_or_default()
}

/// A generation 6 file with uncompressed chunks.
///
/// `nodes` are `(suid, record)` pairs; `collections` are `(owner, records)` pairs in
/// file order.
pub fn v6_file(simulation: &Value, nodes: &[(u64, Value)], collections: &[(u64, Vec<Value>)]) -> Vec<u8> {
    let sim = serde_json::to_vec(simulation).unwrap_or_default();
    let node_chunks: Vec<Vec<u8>> = nodes
        .iter()
        .map(|(_, n)| serde_json::to_vec(n).unwrap_or_default())
        .collect();
    let human_chunks: Vec<Vec<u8>> = collections.iter().map(|(_, r)| collection(r)).collect();

    let header = json!({
        "version": 6,
        "author": "IDM",
        "tool": "DTK",
        "date": "Mon Jan 01 00:00:00 2024",
        "emod_info": {},
        "sim_compression": "NON",
        "sim_chunk_size": to_hex_field(sim.len() as u64),
        "node_suids": nodes.iter().map(|(s, _)| to_hex_field(*s)).collect::<Vec<_>>(),
        "node_compressions": nodes.iter().map(|_| "NON").collect::<Vec<_>>(),
        "node_chunk_sizes": node_chunks.iter().map(|c| to_hex_field(c.len() as u64)).collect::<Vec<_>>(),
        "human_compressions": collections.iter().map(|_| "NON").collect::<Vec<_>>(),
        "human_node_suids": collections.iter().map(|(o, _)| to_hex_field(*o)).collect::<Vec<_>>(),
        "human_num_humans": collections.iter().map(|(_, r)| to_hex_field(r.len() as u64)).collect::<Vec<_>>(),
        "human_chunk_sizes": human_chunks.iter().map(|c| to_hex_field(c.len() as u64)).collect::<Vec<_>>(),
    });

    let mut chunks = vec![sim];
    chunks.extend(node_chunks);
    chunks.extend(human_chunks);
    frame(&header, &chunks)
}

/// A generation 3 file with uncompressed chunks.
pub fn v3_file(simulation: &Value, nodes: &[Value]) -> Vec<u8> {
    let mut chunks = vec![serde_json::to_vec(simulation).unwrap_or_default()];
    chunks.extend(nodes.iter().map(|n| serde_json::to_vec(n).unwrap_or_default()));
    let header = json!({"metadata": {
        "version": 3,
        "author": "unknown",
        "tool": "test",
        "date": "Mon Jan 01 00:00:00 2024",
        "engine": "NONE",
        "compressed": false,
        "chunkcount": chunks.len(),
        "chunksizes": chunks.iter().map(Vec::len).collect::<Vec<_>>(),
        "bytecount": chunks.iter().map(Vec::len).sum::<usize>(),
    }});
    frame(&header, &chunks)
}
