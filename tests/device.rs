#![cfg(feature = "mock")]

mod test_utils;

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Barrier, Mutex,
    },
    thread,
    time::Duration,
};

use hex_literal::hex;
use hidlink::{
    hid::mock::{device_info, MockBackend, MockDevice},
    Device, DeviceConfig, Error,
};
use test_utils::{assert_settles, wait_for};

/// Settle window comfortably longer than a read timeout plus the idle yield.
const QUIET: Duration = Duration::from_millis(50);

fn fast_config(report_length: usize) -> DeviceConfig {
    DeviceConfig::new(report_length).with_read_timeout(Duration::from_millis(2))
}

fn open_one(mock: &Arc<MockBackend>, config: DeviceConfig) -> (MockDevice, Device) {
    let handle = mock.attach(device_info("usb:dut", 0x16c0, 0x0486));
    let device = Device::open(mock.as_ref(), 0x16c0, 0x0486, None, config).unwrap();
    (handle, device)
}

#[test]
fn open_fails_when_nothing_matches() {
    let mock = MockBackend::new();
    let result = Device::open(mock.as_ref(), 0x16c0, 0x0486, None, DeviceConfig::new(8));
    assert!(matches!(result, Err(Error::DeviceNotFound)));
}

#[test]
fn open_honors_the_serial_filter() {
    let mock = MockBackend::new();
    let mut first = device_info("usb:a", 0x16c0, 0x0486);
    first.serial_number = Some("AAA".to_string());
    let mut second = device_info("usb:b", 0x16c0, 0x0486);
    second.serial_number = Some("BBB".to_string());
    mock.attach(first);
    mock.attach(second);

    let device = Device::open(
        mock.as_ref(),
        0x16c0,
        0x0486,
        Some("BBB"),
        DeviceConfig::new(8),
    )
    .unwrap();
    assert_eq!(
        device.serial_number_string().unwrap().as_deref(),
        Some("BBB")
    );

    let missing = Device::open(
        mock.as_ref(),
        0x16c0,
        0x0486,
        Some("CCC"),
        DeviceConfig::new(8),
    );
    assert!(matches!(missing, Err(Error::DeviceNotFound)));
}

#[test]
fn open_path_targets_one_device() {
    let mock = MockBackend::new();
    mock.attach(device_info("usb:a", 0x16c0, 0x0486));

    let device = Device::open_path(mock.as_ref(), "usb:a", DeviceConfig::new(8)).unwrap();
    assert!(device.is_open());

    let missing = Device::open_path(mock.as_ref(), "usb:z", DeviceConfig::new(8));
    assert!(matches!(missing, Err(Error::DeviceNotFound)));
}

#[test]
fn write_prefixes_the_report_id_and_pads_to_length() {
    let mock = MockBackend::new();
    let (handle, device) = open_one(&mock, DeviceConfig::new(8));

    device.write(&hex!("010203")).unwrap();
    device.write(&hex!("1122334455667788")).unwrap();

    let written = handle.written_reports();
    assert_eq!(written.len(), 2);
    // Always report_length + 1 bytes on the wire, byte 0 = report id 0.
    assert_eq!(written[0], hex!("00 010203 0000000000"));
    assert_eq!(written[1], hex!("00 1122334455667788"));
}

#[test]
fn write_rejects_oversized_payloads() {
    let mock = MockBackend::new();
    let (handle, device) = open_one(&mock, DeviceConfig::new(8));

    let result = device.write(&[0u8; 9]);
    assert!(matches!(result, Err(Error::PayloadTooLarge { len: 9, max: 8 })));
    assert!(handle.written_reports().is_empty());
}

#[test]
fn write_failure_propagates_and_leaves_the_device_open() {
    let mock = MockBackend::new();
    let (handle, device) = open_one(&mock, DeviceConfig::new(8));

    handle.fail_writes(true);
    let result = device.write(&hex!("010203"));
    assert!(matches!(result, Err(Error::Backend(_))));
    assert!(device.is_open());
    assert!(handle.written_reports().is_empty());

    // The failure is not sticky on our side; the next attempt goes through.
    handle.fail_writes(false);
    device.write(&hex!("010203")).unwrap();
    assert_eq!(handle.written_reports().len(), 1);
}

#[test]
fn direct_read_failure_propagates_and_leaves_the_device_open() {
    let mock = MockBackend::new();
    let (handle, device) = open_one(&mock, fast_config(8));

    handle.fail_reads(true);
    assert!(matches!(device.read(), Err(Error::Backend(_))));
    // Only the background loop turns a read failure into disposal.
    assert!(device.is_open());
    assert!(!device.is_reading());

    handle.fail_reads(false);
    handle.queue_input_report(hex!("aabb"));
    assert_eq!(device.read().unwrap().to_vec(), hex!("aabb"));
}

#[test]
fn read_requests_the_configured_length() {
    let mock = MockBackend::new();

    let plain = mock.attach(device_info("usb:plain", 0x16c0, 0x0486));
    let device = Device::open_path(mock.as_ref(), "usb:plain", fast_config(8)).unwrap();
    device.read().unwrap();
    assert_eq!(plain.read_request_lengths(), vec![8]);

    let prefixed = mock.attach(device_info("usb:prefixed", 0x16c0, 0x0487));
    let device = Device::open_path(
        mock.as_ref(),
        "usb:prefixed",
        fast_config(8).with_report_ids(true),
    )
    .unwrap();
    device.read().unwrap();
    assert_eq!(prefixed.read_request_lengths(), vec![9]);
}

#[test]
fn read_returns_exactly_the_received_bytes() {
    let mock = MockBackend::new();
    let (handle, device) = open_one(&mock, fast_config(8));

    handle.queue_input_report(hex!("aabbcc"));
    assert_eq!(device.read().unwrap().to_vec(), hex!("aabbcc"));

    // Nothing queued behaves like an expired timeout.
    assert!(device.read().unwrap().is_empty());
}

#[test]
fn feature_reports_round_trip() {
    let mock = MockBackend::new();
    let (handle, device) = open_one(&mock, DeviceConfig::new(8));

    handle.set_feature_report(hex!("aabbcc"));
    let mut buf = [0u8; 8];
    assert_eq!(device.get_feature_report(&mut buf).unwrap(), 3);
    assert_eq!(&buf[..3], hex!("aabbcc"));

    device.send_feature_report(&hex!("0102")).unwrap();
    assert_eq!(handle.sent_feature_reports(), vec![hex!("0102").to_vec()]);
}

#[test]
fn descriptor_strings_and_description() {
    let mock = MockBackend::new();
    let mut info = device_info("usb:a", 0x16c0, 0x0486);
    info.manufacturer_string = Some("Acme".to_string());
    info.product_string = Some("Widget".to_string());
    info.serial_number = Some("S1".to_string());
    let handle = mock.attach(info);
    handle.set_indexed_string(4, "extra");

    let device = Device::open_path(mock.as_ref(), "usb:a", DeviceConfig::new(8)).unwrap();
    assert_eq!(device.manufacturer_string().unwrap().as_deref(), Some("Acme"));
    assert_eq!(device.product_string().unwrap().as_deref(), Some("Widget"));
    assert_eq!(device.indexed_string(4).unwrap().as_deref(), Some("extra"));
    assert_eq!(device.indexed_string(9).unwrap(), None);
    assert_eq!(
        device.description().unwrap(),
        "manufacturer: Acme product: Widget serial: S1"
    );

    // Absent strings print as dashes.
    mock.attach(device_info("usb:b", 0x16c0, 0x0487));
    let bare = Device::open_path(mock.as_ref(), "usb:b", DeviceConfig::new(8)).unwrap();
    assert_eq!(
        bare.description().unwrap(),
        "manufacturer: - product: - serial: -"
    );
}

#[test]
fn disposed_devices_fail_fast() {
    let mock = MockBackend::new();
    let (_handle, device) = open_one(&mock, DeviceConfig::new(8));

    device.dispose();
    assert!(!device.is_open());
    assert!(matches!(device.read(), Err(Error::DeviceClosed)));
    assert!(matches!(device.write(&hex!("01")), Err(Error::DeviceClosed)));
    let mut buf = [0u8; 4];
    assert!(matches!(
        device.get_feature_report(&mut buf),
        Err(Error::DeviceClosed)
    ));
    assert!(matches!(
        device.send_feature_report(&hex!("01")),
        Err(Error::DeviceClosed)
    ));
    assert!(matches!(device.manufacturer_string(), Err(Error::DeviceClosed)));
    assert!(matches!(device.start_async_read(), Err(Error::DeviceClosed)));

    // Second dispose is a no-op.
    device.dispose();
    assert!(!device.is_open());
}

#[test]
fn async_read_delivers_queued_reports_in_order() {
    let mock = MockBackend::new();
    let (handle, device) = open_one(&mock, fast_config(8));

    let reports = Arc::new(Mutex::new(Vec::new()));
    let sink = reports.clone();
    device
        .input_reports()
        .subscribe(move |report| sink.lock().unwrap().push(report.to_vec()));

    handle.queue_input_report(hex!("0102"));
    handle.queue_input_report(hex!("0304"));
    device.start_async_read().unwrap();
    assert!(device.is_reading());
    // Second start while running is a no-op.
    device.start_async_read().unwrap();

    wait_for("both reports", || reports.lock().unwrap().len() == 2);
    assert_eq!(
        *reports.lock().unwrap(),
        vec![hex!("0102").to_vec(), hex!("0304").to_vec()]
    );

    device.stop_async_read();
    assert!(!device.is_reading());
    assert_settles("read attempts", QUIET, || handle.read_request_lengths().len());
    assert!(device.is_open());
}

#[test]
fn reader_restart_resumes_delivery() {
    let mock = MockBackend::new();
    let (handle, device) = open_one(&mock, fast_config(8));

    let reports = Arc::new(Mutex::new(Vec::new()));
    let sink = reports.clone();
    device
        .input_reports()
        .subscribe(move |report| sink.lock().unwrap().push(report.to_vec()));

    device.start_async_read().unwrap();
    handle.queue_input_report(hex!("0102"));
    wait_for("the first report", || reports.lock().unwrap().len() == 1);

    // Stop and restart back to back; the fresh loop must keep delivering.
    device.stop_async_read();
    device.start_async_read().unwrap();
    assert!(device.is_reading());

    handle.queue_input_report(hex!("0304"));
    wait_for("the report after restart", || {
        reports.lock().unwrap().len() == 2
    });
    assert_eq!(
        *reports.lock().unwrap(),
        vec![hex!("0102").to_vec(), hex!("0304").to_vec()]
    );

    device.stop_async_read();
    assert_settles("read attempts", QUIET, || handle.read_request_lengths().len());
    assert!(device.is_open());
}

#[test]
fn stopping_before_any_report_stays_silent_and_terminates() {
    let mock = MockBackend::new();
    let (handle, device) = open_one(&mock, fast_config(8));

    let events = Arc::new(AtomicUsize::new(0));
    let counter = events.clone();
    device.input_reports().subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    device.start_async_read().unwrap();
    device.stop_async_read();

    assert_settles("read attempts", QUIET, || handle.read_request_lengths().len());
    assert_eq!(events.load(Ordering::SeqCst), 0);
    assert!(device.is_open());
}

#[test]
fn read_failure_disconnects_and_disposes_the_device() {
    let mock = MockBackend::new();
    let (handle, device) = open_one(&mock, fast_config(8));

    let disconnects = Arc::new(AtomicUsize::new(0));
    let counter = disconnects.clone();
    device.disconnected().subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    handle.fail_reads(true);
    device.start_async_read().unwrap();

    wait_for("the disconnect event", || {
        disconnects.load(Ordering::SeqCst) == 1
    });
    wait_for("the self-dispose", || !device.is_open());
    assert!(!device.is_reading());

    // The failure fires exactly one disconnect.
    thread::sleep(QUIET);
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    assert!(matches!(device.write(&hex!("01")), Err(Error::DeviceClosed)));
}

#[test]
fn dispose_from_the_disconnect_handler_does_not_deadlock() {
    let mock = MockBackend::new();
    let handle = mock.attach(device_info("usb:dut", 0x16c0, 0x0486));
    let device = Arc::new(
        Device::open(mock.as_ref(), 0x16c0, 0x0486, None, fast_config(8)).unwrap(),
    );

    let inner = device.clone();
    device.disconnected().subscribe(move |_| inner.dispose());

    handle.fail_reads(true);
    device.start_async_read().unwrap();

    wait_for("the handler-driven dispose", || !device.is_open());
    assert!(matches!(device.read(), Err(Error::DeviceClosed)));
}

#[test]
fn dispose_racing_start_async_read_clears_the_reading_flag() {
    // Whichever call wins, a disposed device must not keep reporting a
    // reader that is no longer running.
    for _ in 0..50 {
        let mock = MockBackend::new();
        let (_handle, device) = open_one(&mock, fast_config(8));
        let device = Arc::new(device);

        let racer = device.clone();
        let barrier = Arc::new(Barrier::new(2));
        let gate = barrier.clone();
        let disposer = thread::spawn(move || {
            gate.wait();
            racer.dispose();
        });
        barrier.wait();
        let _ = device.start_async_read();
        disposer.join().unwrap();

        wait_for("the reading flag to clear", || !device.is_reading());
        assert!(!device.is_open());
    }
}

#[test]
fn panicking_report_handler_stops_the_loop_and_restart_recovers() {
    let mock = MockBackend::new();
    let (handle, device) = open_one(&mock, fast_config(8));

    let boom = device
        .input_reports()
        .subscribe(|_| panic!("handler failure"));

    device.start_async_read().unwrap();
    handle.queue_input_report(hex!("0102"));

    // The unwinding reader must not leave the flag stuck on.
    wait_for("the loop to stop", || !device.is_reading());
    assert_settles("read attempts", QUIET, || handle.read_request_lengths().len());
    assert!(device.is_open());

    device.input_reports().unsubscribe(boom);
    let reports = Arc::new(Mutex::new(Vec::new()));
    let sink = reports.clone();
    device
        .input_reports()
        .subscribe(move |report| sink.lock().unwrap().push(report.to_vec()));

    device.start_async_read().unwrap();
    handle.queue_input_report(hex!("0304"));
    wait_for("the report after restart", || {
        reports.lock().unwrap().len() == 1
    });
    assert_eq!(*reports.lock().unwrap(), vec![hex!("0304").to_vec()]);
}

#[test]
fn timeout_and_shape_accessors() {
    let mock = MockBackend::new();
    let (_handle, device) = open_one(&mock, DeviceConfig::new(8).with_report_ids(true));

    assert_eq!(device.report_length(), 8);
    assert!(device.has_report_ids());
    assert_eq!(device.read_timeout(), Duration::from_millis(100));
    device.set_read_timeout(Duration::from_millis(5));
    assert_eq!(device.read_timeout(), Duration::from_millis(5));
}
