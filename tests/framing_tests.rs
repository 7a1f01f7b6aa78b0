#![allow(missing_docs)]

mod common;

use popstate::Error;
use popstate::format::{MAGIC_BYTES, to_hex_field};
use serde_json::json;

fn legacy_file() -> Vec<u8> {
    common::v3_file(
        &json!({"m_Tick": 5}),
        &[json!({"m_Population": 1}), json!({"m_Population": 2})],
    )
}

#[test]
fn test_bad_magic() {
    let mut bytes = legacy_file();
    bytes[3] = b'X';
    assert!(matches!(
        popstate::read_from(bytes.as_slice()),
        Err(Error::BadMagic { .. })
    ));
    assert!(matches!(
        popstate::read_from(&b""[..]),
        Err(Error::BadMagic { .. })
    ));
}

#[test]
fn test_bad_header_size_field() {
    for field in [&b"           0"[..], b"        -100", b"twelve bytes", b"    12"] {
        let mut bytes = MAGIC_BYTES.to_vec();
        bytes.extend_from_slice(field);
        assert!(
            matches!(
                popstate::read_from(bytes.as_slice()),
                Err(Error::BadHeaderSize { .. })
            ),
            "{:?}",
            String::from_utf8_lossy(field)
        );
    }
}

#[test]
fn test_bad_header_json() {
    let text = b"{\"version\": 3, oops";
    let mut bytes = MAGIC_BYTES.to_vec();
    bytes.extend_from_slice(format!("{:>12}", text.len()).as_bytes());
    bytes.extend_from_slice(text);
    assert!(matches!(
        popstate::read_from(bytes.as_slice()),
        Err(Error::BadHeaderJson { .. })
    ));
}

/// Rejected before any chunk byte is read: the body here is not even present.
#[test]
fn test_unknown_version_is_rejected_on_open() {
    for version in [7, 0, -1, 42] {
        let bytes = common::frame(&json!({"version": version, "chunksizes": [100]}), &[]);
        assert!(matches!(
            popstate::read_from(bytes.as_slice()),
            Err(Error::UnknownVersion { version: v }) if v == version
        ));
    }
}

#[test]
fn test_truncated_chunk_is_detected() {
    let bytes = legacy_file();
    let truncated = &bytes[..bytes.len() - 3];
    let err = popstate::read_from(truncated).unwrap_err();
    let Error::ChunkSizeMismatch {
        chunk,
        declared,
        actual,
    } = err
    else {
        panic!("expected ChunkSizeMismatch, got {err}");
    };
    assert_eq!(chunk.kind, popstate::ChunkKind::Node);
    assert_eq!(chunk.index, 1);
    assert_eq!(actual as i64, declared - 3);
}

#[test]
fn test_non_positive_declared_size() {
    let bytes = common::frame(
        &json!({"version": 4, "compression": "NONE", "chunksizes": [2, 0]}),
        &[b"{}".to_vec()],
    );
    assert!(matches!(
        popstate::read_from(bytes.as_slice()),
        Err(Error::ChunkSizeMismatch { declared: 0, .. })
    ));
}

#[test]
fn test_unsupported_codec_name() {
    let bytes = common::frame(
        &json!({"version": 4, "compression": "ZSTD", "chunksizes": [2]}),
        &[b"{}".to_vec()],
    );
    assert!(matches!(
        popstate::read_from(bytes.as_slice()),
        Err(Error::UnsupportedCodec { .. })
    ));
}

/// A corrupt payload opens fine and only fails when that chunk is touched.
#[test]
fn test_corrupt_chunk_fails_lazily() -> popstate::Result<()> {
    let bad = b"{\"m_Population\": ".to_vec();
    let good = b"{\"m_Population\": 2}".to_vec();
    let sim = b"{}".to_vec();
    let header = json!({"version": 5, "compression": "NONE",
        "chunksizes": [sim.len(), bad.len(), good.len()]});
    let bytes = common::frame(&header, &[sim, bad, good]);

    let mut container = popstate::read_from(bytes.as_slice())?;
    let mut nodes = container.nodes()?;
    assert!(nodes.get(1).is_ok());
    let err = nodes.get(0).unwrap_err();
    assert!(matches!(err, Error::CorruptChunk { chunk, .. } if chunk.index == 0));
    Ok(())
}

#[test]
fn test_corrupt_compressed_payload() -> popstate::Result<()> {
    // Size prefix of 4, then a literal run that overflows the input.
    let mut junk = vec![4u8, 0, 0, 0];
    junk.extend_from_slice(&[0xFF; 12]);
    let header = json!({"version": 6, "sim_compression": "LZ4",
        "sim_chunk_size": popstate::format::to_hex_field(junk.len() as u64)});
    let bytes = common::frame(&header, &[junk]);
    let mut container = popstate::read_from(bytes.as_slice())?;
    assert!(matches!(
        container.simulation(),
        Err(Error::CorruptChunk { .. })
    ));
    Ok(())
}

#[test]
fn test_record_count_mismatch_fails_lazily() -> popstate::Result<()> {
    let mut bytes = common::v6_file(
        &json!({}),
        &[(1, json!({"suid": {"id": 1}}))],
        &[(1, common::humans(0..3))],
    );
    // Claim 4 records in a collection that holds 3.
    let needle = b"\"human_num_humans\":[\"0000000000000003\"]";
    let at = bytes
        .windows(needle.len())
        .position(|w| w == needle)
        .unwrap_or(0);
    bytes[at + needle.len() - 3] = b'4';

    let mut container = popstate::read_from(bytes.as_slice())?;
    let mut nodes = container.nodes()?;
    let mut records = nodes.get(0)?.individual_humans()?;
    assert_eq!(records.len(), 4);
    assert!(matches!(
        records.get(0),
        Err(Error::RecordCountMismatch {
            declared: 4,
            actual: 3,
            ..
        })
    ));
    Ok(())
}

#[test]
fn test_index_out_of_range() -> popstate::Result<()> {
    let mut container = popstate::read_from(legacy_file().as_slice())?;
    let mut nodes = container.nodes()?;
    assert!(matches!(
        nodes.get(2),
        Err(Error::IndexOutOfRange { index: 2, len: 2 })
    ));
    let mut records = nodes.get(0)?.individual_humans()?;
    assert!(matches!(
        records.get(0),
        Err(Error::IndexOutOfRange { index: 0, len: 0 })
    ));
    Ok(())
}

#[test]
fn test_invalid_records_are_rejected() -> popstate::Result<()> {
    let mut container = popstate::Container::new(popstate::FormatGeneration::V6, json!({}))?;
    assert!(matches!(
        container.push_node(json!({"m_Population": 1})),
        Err(Error::InvalidRecord { .. })
    ));
    assert!(matches!(
        container.push_node(json!({"suid": {"id": 1}, "individualHumans": 5})),
        Err(Error::InvalidRecord { .. })
    ));
    assert!(matches!(
        container.set_simulation(json!("not an object")),
        Err(Error::InvalidRecord { .. })
    ));
    Ok(())
}

#[test]
fn test_declared_record_totals_that_overflow_are_rejected() {
    let sim = b"{}".to_vec();
    let node = br#"{"suid":{"id":1}}"#.to_vec();
    let empty = common::collection(&[]);
    let huge = to_hex_field(1 << 63);
    let header = json!({
        "version": 6,
        "sim_compression": "NON",
        "sim_chunk_size": to_hex_field(sim.len() as u64),
        "node_suids": [to_hex_field(1)],
        "node_compressions": ["NON"],
        "node_chunk_sizes": [to_hex_field(node.len() as u64)],
        "human_compressions": ["NON", "NON"],
        "human_node_suids": [to_hex_field(1), to_hex_field(1)],
        "human_num_humans": [huge.clone(), huge],
        "human_chunk_sizes": [to_hex_field(empty.len() as u64), to_hex_field(empty.len() as u64)],
    });
    let bytes = common::frame(&header, &[sim, node, empty.clone(), empty]);
    assert!(matches!(
        popstate::read_from(bytes.as_slice()),
        Err(Error::BadHeaderJson { .. })
    ));
}

#[test]
fn test_sizes_beyond_the_input_are_truncation() {
    let sim = b"{}".to_vec();
    let v6 = common::frame(
        &json!({
            "version": 6,
            "sim_compression": "NON",
            "sim_chunk_size": to_hex_field(i64::MAX as u64),
        }),
        &[sim.clone()],
    );
    let legacy = common::frame(
        &json!({"version": 4, "compression": "NONE", "chunksizes": [i64::MAX]}),
        &[sim],
    );
    for bytes in [v6, legacy] {
        assert!(matches!(
            popstate::read_from(bytes.as_slice()),
            Err(Error::ChunkSizeMismatch {
                declared: i64::MAX,
                actual: 2,
                ..
            })
        ));
    }
}
