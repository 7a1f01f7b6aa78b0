#![allow(missing_docs)]

mod common;

use popstate::compression::registry;
use popstate::{Compression, Container, FormatGeneration, Header, Inspector};
use serde_json::{Map, Value, json};

const GENERATIONS: [FormatGeneration; 6] = [
    FormatGeneration::V1,
    FormatGeneration::V2,
    FormatGeneration::V3,
    FormatGeneration::V4,
    FormatGeneration::V5,
    FormatGeneration::V6,
];

fn compiled_codecs() -> Vec<Compression> {
    Compression::ALL
        .into_iter()
        .filter(|c| registry().get(*c).is_ok())
        .collect()
}

fn simulation() -> Value {
    json!({
        "__class__": "SimulationMalaria",
        "m_Tick": 365,
        "randomSeed": 42,
        "infectionSuidGenerator": {"next_suid": {"id": 1001}}
    })
}

fn node(suid: u64, population: usize) -> Value {
    json!({
        "suid": {"id": suid},
        "m_Population": population,
        "latitude": 12.5,
        "individualHumans": common::humans(0..population as u64)
    })
}

fn without_nodes(sim: &Map<String, Value>) -> Map<String, Value> {
    let mut sim = sim.clone();
    sim.remove("nodes");
    sim
}

fn build(generation: FormatGeneration, codec: Compression) -> popstate::Result<Container> {
    let mut container = Container::new(generation, simulation())?;
    container.set_compression(codec)?;
    container.push_node(node(1, 5))?;
    container.push_node(node(2, 0))?;
    container.push_node(node(3, 40))?;
    Ok(container)
}

fn write_then_read(container: &mut Container) -> popstate::Result<Container> {
    let mut buffer = Vec::new();
    popstate::write_to(container, &mut buffer)?;
    popstate::read_from(buffer.as_slice())
}

/// Every generation and every compiled codec survives a write/read cycle.
#[test]
fn test_every_generation_and_codec_round_trips() -> popstate::Result<()> {
    for generation in GENERATIONS {
        for codec in compiled_codecs() {
            let mut original = build(generation, codec)?;
            let mut loaded = write_then_read(&mut original)?;

            assert_eq!(loaded.generation(), generation);
            // Generation 6 codecs are per chunk, see the header table test below.
            if !generation.is_paged() {
                assert_eq!(loaded.compression(), Some(codec), "{generation} {codec}");
            }
            assert_eq!(
                without_nodes(loaded.simulation()?),
                without_nodes(simulation().as_object().unwrap_or(&Map::new())),
                "{generation} {codec}"
            );

            let mut nodes = loaded.nodes()?;
            assert_eq!(nodes.len(), 3);
            for (index, (suid, population)) in [(1, 5), (2, 0), (3, 40)].into_iter().enumerate() {
                let node = nodes.get(index)?;
                let field = node.get("m_Population")?.and_then(|f| f.into_value().cloned());
                assert_eq!(field, Some(json!(population)));
                let records = node.individual_humans()?.to_vec()?;
                assert_eq!(records, common::humans(0..population as u64), "{generation} {codec} node {suid}");
            }
        }
    }
    Ok(())
}

/// Generation 6 records land in collection chunks written with the pinned codec.
#[test]
fn test_v6_header_tables_follow_the_pinned_codec() -> popstate::Result<()> {
    for codec in compiled_codecs() {
        let mut container = build(FormatGeneration::V6, codec)?;
        let loaded = write_then_read(&mut container)?;
        let Header::V6(header) = loaded.header() else {
            panic!("expected a generation 6 header");
        };
        assert_eq!(header.nodes.iter().map(|n| n.suid).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(header.humans.len(), 2);
        assert_eq!(header.humans[0].owner, 1);
        assert_eq!(header.humans[0].records, 5);
        assert_eq!(header.humans[1].owner, 3);
        assert!(header.nodes.iter().all(|n| n.compression == codec));
        assert!(header.humans.iter().all(|h| h.compression == codec));
    }
    Ok(())
}

/// Unpinned generation 6 chunks pick LZ4 by size.
#[test]
fn test_v6_unpinned_chunks_use_size_selection() -> popstate::Result<()> {
    let mut container = Container::new(FormatGeneration::V6, simulation())?;
    container.push_node(node(9, 3))?;
    let loaded = write_then_read(&mut container)?;
    let Header::V6(header) = loaded.header() else {
        panic!("expected a generation 6 header");
    };
    assert_eq!(header.simulation.compression, Compression::Lz4);
    assert_eq!(header.humans[0].compression, Compression::Lz4);
    Ok(())
}

/// Header framing per generation: metadata wrapper and codec key.
#[test]
fn test_header_text_matches_generation() -> popstate::Result<()> {
    for generation in GENERATIONS {
        let mut container = Container::new(generation, simulation())?;
        let mut buffer = Vec::new();
        popstate::write_to(&mut container, &mut buffer)?;

        assert_eq!(&buffer[..4], b"IDTK");
        let size: usize = String::from_utf8_lossy(&buffer[4..16]).trim().parse().unwrap_or(0);
        let text = String::from_utf8_lossy(&buffer[16..16 + size]).into_owned();
        match generation {
            FormatGeneration::V1 | FormatGeneration::V2 | FormatGeneration::V3 => {
                assert!(text.starts_with(r#"{"metadata":"#), "{generation}");
                assert!(text.contains(r#""engine":"LZ4""#));
            }
            FormatGeneration::V4 | FormatGeneration::V5 => {
                assert!(text.contains(r#""compression":"LZ4""#));
                assert!(!text.contains("engine"));
            }
            FormatGeneration::V6 => {
                assert!(text.contains(r#""sim_chunk_size":""#));
                assert!(text.contains(r#""author":"IDM""#));
            }
        }
    }
    Ok(())
}

/// The written simulation chunk always carries an empty `nodes` array.
#[test]
fn test_simulation_nodes_field_is_sealed() -> popstate::Result<()> {
    let sim = json!({"m_Tick": 1});
    let nodes = vec![json!({"m_Population": 0})];
    let bytes = common::v3_file(&json!({"m_Tick": 1, "nodes": [{"stale": true}]}), &nodes);
    let mut container = popstate::read_from(bytes.as_slice())?;
    assert_eq!(Value::Object(container.simulation()?.clone()), sim);

    let mut buffer = Vec::new();
    popstate::write_to(&mut container, &mut buffer)?;
    let text = String::from_utf8_lossy(&buffer);
    assert!(text.contains(r#""nodes":[]"#));
    Ok(())
}

/// Generation 1 keeps its single combined chunk.
#[test]
fn test_v1_writes_one_combined_chunk() -> popstate::Result<()> {
    let mut container = build(FormatGeneration::V1, Compression::None)?;
    let mut loaded = write_then_read(&mut container)?;
    assert_eq!(loaded.chunk_count(), 1);
    assert_eq!(loaded.node_count()?, 3);
    let mut nodes = loaded.nodes()?;
    assert_eq!(nodes.get(2)?.suid(), Some(3));
    Ok(())
}

/// Standard file IO plus the inspector.
#[test]
#[cfg(not(target_arch = "wasm32"))]
fn test_file_io_and_inspection() -> popstate::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("state-00365.dtk");

    let mut container = build(FormatGeneration::V6, Compression::None)?;
    container.set_author("tests");
    popstate::write(&mut container, &path)?;

    let report = Inspector::inspect(&path)?;
    assert_eq!(report.version, 6);
    assert_eq!(report.author, "tests");
    assert_eq!(report.chunk_count, 1 + 3 + 2);
    assert_eq!(report.collection_count(), 2);
    let expected_size = 4 + 12 + report.header_size.unwrap_or(0) as u64 + report.byte_count;
    assert_eq!(report.file_size, Some(expected_size));

    let mut loaded = popstate::read(&path)?;
    assert_eq!(loaded.author(), "tests");
    assert!(!loaded.date().is_empty());
    assert_eq!(loaded.resident_chunks().total(), 0);
    assert_eq!(loaded.nodes()?.get(2)?.individual_humans()?.len(), 40);
    Ok(())
}

/// Keys the crate does not know about are written back untouched.
#[test]
fn test_unknown_header_keys_survive() -> popstate::Result<()> {
    let header = json!({
        "version": 6, "custom_field": {"keep": [1, 2, 3]},
        "sim_compression": "NON", "sim_chunk_size": "0000000000000002"
    });
    let bytes = common::frame(&header, &[b"{}".to_vec()]);
    let mut container = popstate::read_from(bytes.as_slice())?;
    let mut buffer = Vec::new();
    popstate::write_to(&mut container, &mut buffer)?;
    let text = String::from_utf8_lossy(&buffer);
    assert!(text.contains(r#""custom_field":{"keep":[1,2,3]}"#));
    Ok(())
}

/// Looking at a node's records must not add the key to a node that had none.
#[test]
fn test_reading_records_leaves_node_payload_untouched() -> popstate::Result<()> {
    let bytes = common::v3_file(&json!({"m_Tick": 0}), &[json!({"suid": {"id": 1}})]);
    let mut container = popstate::read_from(bytes.as_slice())?;
    {
        let mut nodes = container.nodes()?;
        let node = nodes.get(0)?;
        assert!(node.individual_humans()?.is_empty());
        assert!(node.individual_humans()?.to_vec()?.is_empty());
    }

    let mut loaded = write_then_read(&mut container)?;
    let mut nodes = loaded.nodes()?;
    assert_eq!(nodes.get(0)?.keys()?, vec!["suid".to_string()]);
    Ok(())
}

/// A write that fails part way leaves the previous file in place and no stray files.
#[test]
#[cfg(not(target_arch = "wasm32"))]
fn test_failed_write_keeps_existing_file() -> popstate::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("state-00001.dtk");

    let mut good = build(FormatGeneration::V6, Compression::None)?;
    popstate::write(&mut good, &path)?;
    let before = std::fs::read(&path)?;

    let sim = b"[1]".to_vec();
    let header = json!({
        "version": 6,
        "sim_compression": "NON",
        "sim_chunk_size": popstate::format::to_hex_field(sim.len() as u64)
    });
    let bytes = common::frame(&header, &[sim]);
    let mut bad = popstate::read_from(bytes.as_slice())?;
    // Decodes the chunk, then rejects it as a non-object; the chunk stays resident.
    assert!(bad.simulation().is_err());

    assert!(popstate::write(&mut bad, &path).is_err());
    assert_eq!(std::fs::read(&path)?, before);
    assert_eq!(std::fs::read_dir(dir.path())?.count(), 1);
    Ok(())
}

/// Collections come back grouped per node in node order, orphans last.
#[test]
fn test_v6_collection_write_order_is_normalized() -> popstate::Result<()> {
    let bytes = common::v6_file(
        &json!({"m_Tick": 0}),
        &[(1, json!({"suid": {"id": 1}})), (2, json!({"suid": {"id": 2}}))],
        &[
            (2, common::humans(0..2)),
            (99, common::humans(10..11)),
            (1, common::humans(20..23)),
            (1, common::humans(30..31)),
        ],
    );
    let mut container = popstate::read_from(bytes.as_slice())?;
    let loaded = write_then_read(&mut container)?;
    let Header::V6(header) = loaded.header() else {
        panic!("expected a generation 6 header");
    };
    let order: Vec<(u64, u64)> = header.humans.iter().map(|h| (h.owner, h.records)).collect();
    assert_eq!(order, vec![(1, 3), (1, 1), (2, 2), (99, 1)]);
    Ok(())
}
