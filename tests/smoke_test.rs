//! Smoke tests for basic functionality

use scsi_ram::{Cdb, Command, Executor, SgList, TargetConfig};

#[test]
fn test_version_exists() {
    // Verify the crate version string is valid semver
    let version = env!("CARGO_PKG_VERSION");
    assert!(!version.is_empty());
    let parts: Vec<&str> = version.split('.').collect();
    assert_eq!(parts.len(), 3, "Version should be semver: {version}");
}

#[test]
fn test_package_name() {
    assert_eq!(env!("CARGO_PKG_NAME"), "scsi-ram");
}

#[test]
fn test_facade_reexports_core() {
    assert_eq!(scsi_ram::PAGE_SIZE, 4096);
    assert_eq!(scsi_ram::MAX_TARGETS, 16);
    assert_eq!(scsi_ram::cdb::READ_10, 0x28);
}

#[test]
fn test_default_config_is_512_mib() {
    let config = TargetConfig::default();
    assert_eq!(config.capacity_bytes(), 512 * 1024 * 1024);
    assert!(config.validate().is_ok());
}

#[test]
fn test_executor_round_trip() {
    let exec = Executor::new(&TargetConfig::new().with_capacity_blocks(64)).unwrap();
    let mut write = Command::with_sg(Cdb::rw10(true, 1, 1), SgList::chunked(&[0x42; 512], 128));
    exec.execute(&mut write);
    assert!(write.result().is_good());

    let mut read = Command::with_sg(Cdb::rw10(false, 1, 1), SgList::zeroed(1, 512));
    exec.execute(&mut read);
    assert_eq!(read.sg.to_vec(), vec![0x42; 512]);
}
