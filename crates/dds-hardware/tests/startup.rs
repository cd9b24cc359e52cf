//! Startup path: config file → registry → AOM interface.

use dds_core::error::DdsError;
use dds_hardware::{
    create_registry_from_config, AomInterface, MappingOptions, ProfileLedger, SystemConfig,
};

#[tokio::test]
async fn simulation_builds_from_factories() {
    let config = SystemConfig::simulation().unwrap();
    let registry = create_registry_from_config(&config).await.unwrap();

    let ids: Vec<String> = registry.list_devices().into_iter().map(|d| d.id).collect();
    assert_eq!(ids, vec!["bus", "dds"]);
    assert_eq!(
        registry.get_device_info("dds").unwrap().metadata.identity.as_deref(),
        Some("coherentDds simulation")
    );

    let aoms = AomInterface::from_config(&config, &registry).unwrap();
    assert_eq!(
        aoms.aoms().map(|a| a.name().to_string()).collect::<Vec<_>>(),
        vec!["rH2", "rHSr", "rPara", "rParaB"]
    );
    aoms.set_profile("rPara", 3.091e9 - 225e6, 1, 1.0, 0.0, &MappingOptions::default())
        .await
        .unwrap();
    aoms.set_to_profile("rPara", 1).await.unwrap();

    registry.shutdown();
    assert!(registry.is_empty());
}

#[tokio::test]
async fn ledger_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let ledger_path = dir.path().join("profiles.json");
    let config_path = dir.path().join("system.toml");

    let mut config = SystemConfig::simulation().unwrap();
    config.ledger_path = Some(ledger_path.clone());
    std::fs::write(&config_path, toml::to_string(&config).unwrap()).unwrap();

    let config = SystemConfig::from_file(&config_path).unwrap();
    let registry = create_registry_from_config(&config).await.unwrap();
    let aoms = AomInterface::from_config(&config, &registry).unwrap();
    aoms.set_profile("rParaB", 3.091e9 - 240e6, 0, 0.25, 0.0, &MappingOptions::default())
        .await
        .unwrap();
    drop(aoms);
    registry.shutdown();

    let reloaded = ProfileLedger::open(&ledger_path).unwrap();
    let on = reloaded.get("dds", 3, 0).unwrap();
    assert_eq!(on.amplitude, 0.25);
    assert!((on.frequency_hz - 240e6).abs() < 1.0);
    assert_eq!(reloaded.get("dds", 3, 7).map(|s| s.amplitude), Some(0.0));
}

#[tokio::test]
async fn invalid_driver_table_fails_before_any_build() {
    let config = SystemConfig::from_toml_str(
        r#"
        [[devices]]
        id = "dds"
        driver = { type = "mock_dds" }

        [[devices]]
        id = "bus"
        driver = { type = "mock_timed_bus", clock_div = 0 }
        "#,
    )
    .unwrap();

    match create_registry_from_config(&config).await {
        Err(DdsError::Configuration(message)) => assert!(message.contains("'bus'")),
        Err(other) => panic!("expected configuration error, got {other}"),
        Ok(_) => panic!("invalid bus config was accepted"),
    }
}

#[tokio::test]
async fn unreachable_dds_is_fatal() {
    let config = SystemConfig::simulation()
        .unwrap()
        .with_dds_overrides(Some("/dev/does-not-exist-dds"), None);

    match create_registry_from_config(&config).await {
        Err(DdsError::Driver(err)) => assert_eq!(err.driver_type, "coherent_dds"),
        Err(other) => panic!("expected driver error, got {other}"),
        Ok(_) => panic!("registry built without its DDS"),
    }
}

#[tokio::test]
async fn mixed_clock_rates_are_rejected() {
    let config = SystemConfig::from_toml_str(
        r#"
        [[devices]]
        id = "a"
        driver = { type = "mock_dds", clock_hz = 1.0e9 }

        [[devices]]
        id = "b"
        driver = { type = "mock_dds", clock_hz = 0.8e9, max_frequency_hz = 350.0e6 }

        [[groups]]
        name = "g"
        devices = [{ dds = "a" }, { dds = "b" }]
        channels = { x = { device = "a", channel = 0 }, y = { device = "b", channel = 0 } }

        [[aoms]]
        name = "x"
        group = "g"
        channel = "x"
        range_hz = [100.0e6, 300.0e6]
        mapping = { formula = "direct" }

        [[aoms]]
        name = "y"
        group = "g"
        channel = "y"
        range_hz = [100.0e6, 300.0e6]
        mapping = { formula = "direct" }
        "#,
    )
    .unwrap();

    let registry = create_registry_from_config(&config).await.unwrap();
    let err = match AomInterface::from_config(&config, &registry) {
        Err(err) => err,
        Ok(_) => panic!("channels with different LSBs were accepted"),
    };
    assert!(err.to_string().contains("different frequency LSBs"));
}
