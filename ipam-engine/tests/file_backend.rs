use std::fs;

use ipam_config::{IpamConfig, StorageConfig};
use ipam_engine::Ipam;

fn config_for(path: &std::path::Path) -> IpamConfig {
    IpamConfig {
        storage: StorageConfig::file(path),
        ..IpamConfig::default()
    }
}

#[test]
fn state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state/ipam-storage.json");
    let config = config_for(&path);

    {
        let ipam = Ipam::from_config(&config).unwrap();
        ipam.create_pool("lab", &["10.0.0.0/16", "2001:db8::/48"])
            .unwrap();
        ipam.create_allocation("a", "lab", 24).unwrap();
        ipam.close().unwrap();
    }

    let ipam = Ipam::from_config(&config).unwrap();
    let pool = ipam.read_pool("lab").unwrap().unwrap();
    assert_eq!(pool.cidrs, vec!["10.0.0.0/16", "2001:db8::/48"]);

    let next = ipam.create_allocation("b", "lab", 24).unwrap();
    assert_eq!(next.allocated_cidr, "10.0.1.0/24");
}

#[test]
fn document_shape() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ipam-storage.json");
    let ipam = Ipam::from_config(&config_for(&path)).unwrap();

    ipam.create_pool("lab", &["10.0.0.0/16"]).unwrap();
    ipam.create_allocation("a", "lab", 27).unwrap();

    let raw = fs::read_to_string(&path).unwrap();
    assert!(raw.contains("\n  \"pools\": {"));

    let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(
        doc,
        serde_json::json!({
            "pools": {
                "lab": {"name": "lab", "cidrs": ["10.0.0.0/16"]}
            },
            "allocations": {
                "a": {
                    "id": "a",
                    "pool_name": "lab",
                    "allocated_cidr": "10.0.0.0/27",
                    "prefix_length": 27
                }
            }
        })
    );
}

#[test]
fn hand_written_document_is_loaded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ipam-storage.json");
    fs::write(
        &path,
        r#"{"pools": {"edge": {"name": "edge", "cidrs": ["172.16.0.0/24"]}},
            "allocations": {"gw": {"id": "gw", "pool_name": "edge",
                                   "allocated_cidr": "172.16.0.0/25", "prefix_length": 25}}}"#,
    )
    .unwrap();

    let ipam = Ipam::from_config(&config_for(&path)).unwrap();
    let next = ipam.create_allocation("lb", "edge", 25).unwrap();
    assert_eq!(next.allocated_cidr, "172.16.0.128/25");
    assert!(ipam.create_allocation("extra", "edge", 25).is_err());
}

#[test]
fn corrupt_document_fails_to_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ipam-storage.json");
    fs::write(&path, "{\"pools\": [").unwrap();
    assert!(Ipam::from_config(&config_for(&path)).is_err());
}
