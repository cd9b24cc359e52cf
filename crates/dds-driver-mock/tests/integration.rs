//! Integration tests for the mock driver crate

use dds_core::capabilities::{ProfileProgrammable, TimedBus};
use dds_core::driver::{Capability, DriverFactory};
use dds_core::error::DdsError;
use dds_core::timing::{BusTiming, ControlWord};
use dds_driver_mock::*;

#[tokio::test]
async fn test_factories_build_components() {
    let dds = MockDdsFactory
        .build(toml::Value::Table(toml::toml! { clock_hz = 1.0e9 }))
        .await
        .unwrap();
    assert_eq!(
        dds.capabilities(),
        vec![Capability::ProfileProgrammable, Capability::PulseShaping]
    );
    assert_eq!(dds.metadata.clock_hz, Some(1e9));

    let bus = MockTimedBusFactory
        .build(toml::Value::Table(toml::toml! { start_mu = 5000 }))
        .await
        .unwrap();
    let bus = bus.timed_bus.unwrap();
    assert_eq!(bus.now_mu(), 5000);
    assert_eq!(bus.timing(), BusTiming::default());
}

#[tokio::test]
async fn test_back_to_back_switches_never_collide() {
    let bus = MockTimedBus::new(BusTiming::default());
    for profile in 0..8 {
        bus.schedule_switch(ControlWord::profile(0, profile).unwrap())
            .await
            .unwrap();
    }

    let events = bus.events();
    assert_eq!(events.len(), 8);
    let xfer = BusTiming::default().xfer_period_mu();
    assert!(events.windows(2).all(|w| w[1].at_mu - w[0].at_mu >= xfer));
    let profiles: Vec<u8> = events.iter().map(|e| e.control_byte() & 0xf).collect();
    assert_eq!(profiles, (0..8).collect::<Vec<u8>>());
}

#[tokio::test]
async fn test_fault_injection_surfaces_without_retry() {
    let dds = MockDds::new().with_faults(FaultConfig::scenario(FaultScenario::FailAfterN {
        operation: "set_profile",
        count: 1,
    }));

    dds.set_profile(0, 1, 10e6, 0.0, 1.0).await.unwrap();
    let err = dds.set_profile(0, 2, 10e6, 0.0, 1.0).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DdsError>(),
        Some(DdsError::Driver(_))
    ));
    assert_eq!(dds.write_count(), 1);
    assert_eq!(dds.profile(0, 2), None);
}

#[tokio::test]
async fn test_realistic_mode_still_records() {
    let dds = MockDds::with_config(MockDdsConfig {
        mode: MockMode::Realistic,
        ..Default::default()
    })
    .unwrap();
    assert_eq!(dds.identity().await.unwrap(), "coherentDds simulation");
    assert_eq!(dds.commands(), vec!["idn?".to_string()]);
}
