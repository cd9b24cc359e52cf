//! Wire-level tests for the coherent DDS driver against a firmware emulator.

use dds_core::capabilities::{ProfileProgrammable, PulseShaping};
use dds_core::error::DdsError;
use dds_core::pulse_shape::sensible_shape;
use dds_driver_coherent::{CoherentDds, CoherentDdsConfig};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

type WireLog = Arc<Mutex<Vec<String>>>;

/// Record every line the host sends and answer like the board does.
///
/// `identity` of `None` leaves `idn?` unanswered.
fn spawn_firmware(device: DuplexStream, identity: Option<&'static str>) -> WireLog {
    let log: WireLog = Arc::default();
    let seen = log.clone();

    tokio::spawn(async move {
        let (rd, mut wr) = tokio::io::split(device);
        let mut lines = BufReader::new(rd).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            seen.lock().unwrap().push(line.clone());
            let replies: Vec<&str> = match line.split_whitespace().next() {
                Some("idn?") => identity.into_iter().collect(),
                Some("setDisableCoherence") => vec!["Coherence settings updated"],
                Some("setClockSource") => vec!["Switching clock", "Done"],
                _ => Vec::new(),
            };
            for reply in replies {
                if wr.write_all(format!("{}\n", reply).as_bytes()).await.is_err() {
                    return;
                }
            }
        }
    });

    log
}

async fn connect(config: CoherentDdsConfig) -> (CoherentDds, WireLog) {
    let (host, device) = tokio::io::duplex(4096);
    let log = spawn_firmware(device, Some("coherentDds v1"));
    let dds = CoherentDds::with_port(Box::new(host), &config).await.unwrap();
    (dds, log)
}

fn lines_after_init(log: &WireLog) -> Vec<String> {
    // coherence + 4 x (header, data)
    log.lock().unwrap().iter().skip(9).cloned().collect()
}

#[tokio::test]
async fn init_sequence_matches_firmware_protocol() {
    let mut config = CoherentDdsConfig::new("duplex");
    config.incoherent_channels = [false, true, false, false];
    config.internal_clock = true;
    let (dds, log) = connect(config).await;

    // identity is answered only after every earlier line was consumed
    assert_eq!(dds.identity().await.unwrap(), "coherentDds v1");

    let expected: Vec<String> = [
        "setDisableCoherence 0 1 0 0",
        "setPulseShape 0",
        "16383",
        "setPulseShape 1",
        "16383",
        "setPulseShape 2",
        "16383",
        "setPulseShape 3",
        "16383",
        "setClockSource 1",
        "idn?",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    assert_eq!(*log.lock().unwrap(), expected);
}

#[tokio::test]
async fn set_profile_sends_quantized_words() {
    let (dds, log) = connect(CoherentDdsConfig::new("duplex")).await;

    let words = dds.set_profile(2, 5, 100e6, 90.0, 0.5).await.unwrap();
    dds.reset_phase().await.unwrap();
    dds.identity().await.unwrap();

    assert_eq!(words.frequency, 429_496_730);
    assert_eq!(words.amplitude, 8192);
    assert_eq!(
        lines_after_init(&log),
        vec![
            format!("setProfile 2 5 429496730 {} 8192", words.phase),
            "resetPhase".to_string(),
            "idn?".to_string(),
        ]
    );
}

#[tokio::test]
async fn rejected_request_never_reaches_the_wire() {
    let (dds, log) = connect(CoherentDdsConfig::new("duplex")).await;

    let err = dds.set_profile(0, 0, 451e6, 0.0, 1.0).await.unwrap_err();
    assert_eq!(
        err.downcast_ref::<DdsError>().and_then(DdsError::field),
        Some("frequency")
    );
    let err = dds.set_profile(0, 8, 10e6, 0.0, 1.0).await.unwrap_err();
    assert_eq!(
        err.downcast_ref::<DdsError>().and_then(DdsError::field),
        Some("profile")
    );

    dds.identity().await.unwrap();
    assert_eq!(lines_after_init(&log), vec!["idn?".to_string()]);
}

#[tokio::test]
async fn pulse_shape_is_sent_as_one_word_line() {
    let (dds, log) = connect(CoherentDdsConfig::new("duplex")).await;
    let shape = sensible_shape(1e-6).unwrap();

    dds.load_pulse_shape(1, &shape).await.unwrap();
    dds.identity().await.unwrap();

    let lines = lines_after_init(&log);
    assert_eq!(lines[0], "setPulseShape 1");
    let words: Vec<u16> = lines[1].split(',').map(|w| w.parse().unwrap()).collect();
    assert_eq!(words.len(), 200);
    assert_eq!(words, shape.quantize());
}

#[tokio::test]
async fn silent_device_times_out() {
    let (host, device) = tokio::io::duplex(4096);
    let _log = spawn_firmware(device, None);
    let mut config = CoherentDdsConfig::new("duplex");
    config.timeout_ms = 50;
    let dds = CoherentDds::with_port(Box::new(host), &config).await.unwrap();

    let err = dds.identity().await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DdsError>(),
        Some(DdsError::Timeout { timeout_ms: 50, .. })
    ));
}

#[tokio::test]
async fn missing_port_is_a_connection_error() {
    let config = CoherentDdsConfig::new("/dev/does-not-exist-dds");
    let err = match CoherentDds::open(&config).await {
        Ok(_) => panic!("opened a port that does not exist"),
        Err(e) => e,
    };
    assert!(matches!(
        err.downcast_ref::<DdsError>(),
        Some(DdsError::Connection(_))
    ));
}
