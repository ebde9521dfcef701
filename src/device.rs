//! Open devices: serialized I/O and the background read loop.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering},
        mpsc, Arc, Mutex,
    },
    thread,
    time::Duration,
};

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    error::Error,
    event::Event,
    hid::{HidBackend, HidHandle},
    Result,
};

/// How long [`Device::dispose`] waits for the read loop to acknowledge the
/// stop signal before abandoning the thread.
const READER_EXIT_WAIT: Duration = Duration::from_millis(500);

/// Read-loop yield between empty (timed-out) reads.
const READER_IDLE_YIELD: Duration = Duration::from_millis(1);

const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Per-device configuration supplied at open time.
///
/// The report length is mandatory: HID exchanges fixed-size reports and the
/// byte protocol cannot describe its own size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    report_length: usize,
    has_report_ids: bool,
    read_timeout: Duration,
}

impl DeviceConfig {
    pub fn new(report_length: usize) -> Self {
        DeviceConfig {
            report_length,
            has_report_ids: false,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// Input reports carry a report-id prefix byte.
    pub fn with_report_ids(mut self, has_report_ids: bool) -> Self {
        self.has_report_ids = has_report_ids;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn report_length(&self) -> usize {
        self.report_length
    }

    pub fn has_report_ids(&self) -> bool {
        self.has_report_ids
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }
}

/// One open HID device.
///
/// All native I/O runs behind a single lock: reads, writes, feature reports,
/// string queries, and the closing of the handle never overlap. The optional
/// background reader started by [`start_async_read`](Self::start_async_read)
/// delivers each input report through [`input_reports`](Self::input_reports)
/// and tears the device down when a read fails.
///
/// [`dispose`](Self::dispose) is idempotent and safe from any thread,
/// including event handlers running on the reader thread. Dropping the
/// device disposes it.
pub struct Device {
    shared: Arc<Shared>,
}

struct Shared {
    handle: Mutex<Option<Box<dyn HidHandle>>>,
    report_length: usize,
    has_report_ids: bool,
    read_timeout_ms: AtomicI32,
    disposed: AtomicBool,
    reading: AtomicBool,
    read_generation: AtomicU64,
    reader: Mutex<Option<ReaderState>>,
    input_reports: Event<Bytes>,
    disconnected: Event<()>,
}

struct ReaderState {
    thread: thread::JoinHandle<()>,
    exited: mpsc::Receiver<()>,
}

impl Device {
    /// Opens the first device matching `vendor_id`/`product_id`, and
    /// `serial` when one is given.
    pub fn open(
        backend: &dyn HidBackend,
        vendor_id: u16,
        product_id: u16,
        serial: Option<&str>,
        config: DeviceConfig,
    ) -> Result<Device> {
        let handle = backend.open(vendor_id, product_id, serial)?;
        Ok(Device::from_handle(handle, config))
    }

    /// Opens the device at an enumerated platform path.
    pub fn open_path(backend: &dyn HidBackend, path: &str, config: DeviceConfig) -> Result<Device> {
        let handle = backend.open_path(path)?;
        Ok(Device::from_handle(handle, config))
    }

    fn from_handle(handle: Box<dyn HidHandle>, config: DeviceConfig) -> Device {
        Device {
            shared: Arc::new(Shared {
                handle: Mutex::new(Some(handle)),
                report_length: config.report_length,
                has_report_ids: config.has_report_ids,
                read_timeout_ms: AtomicI32::new(timeout_ms(config.read_timeout)),
                disposed: AtomicBool::new(false),
                reading: AtomicBool::new(false),
                read_generation: AtomicU64::new(0),
                reader: Mutex::new(None),
                input_reports: Event::new(),
                disconnected: Event::new(),
            }),
        }
    }

    /// Sends one output report.
    ///
    /// The wire buffer is always `report_length + 1` bytes: byte 0 carries
    /// the report id (0), the payload starts at offset 1, and the remainder
    /// is zero-padded. Payloads longer than the report length are rejected.
    pub fn write(&self, payload: &[u8]) -> Result<()> {
        let report_length = self.shared.report_length;
        if payload.len() > report_length {
            return Err(Error::PayloadTooLarge {
                len: payload.len(),
                max: report_length,
            });
        }
        let mut report = BytesMut::with_capacity(report_length + 1);
        report.put_u8(0);
        report.extend_from_slice(payload);
        report.resize(report_length + 1, 0);
        self.shared.with_handle(|handle| {
            handle.write(&report)?;
            Ok(())
        })
    }

    /// Reads one input report, waiting up to the configured timeout.
    ///
    /// The buffer offered to the native layer is `report_length` bytes, or
    /// `report_length + 1` when the device prefixes reports with an id byte.
    /// Returns exactly the bytes received, empty when the timeout elapsed.
    pub fn read(&self) -> Result<Bytes> {
        self.shared.read_report()
    }

    /// Reads a feature report. Byte 0 of `buf` selects the report id going
    /// in and holds it coming out, per HID convention.
    pub fn get_feature_report(&self, buf: &mut [u8]) -> Result<usize> {
        self.shared.with_handle(|handle| handle.get_feature_report(buf))
    }

    /// Sends a feature report; byte 0 is the report id.
    pub fn send_feature_report(&self, data: &[u8]) -> Result<()> {
        self.shared
            .with_handle(|handle| handle.send_feature_report(data))
    }

    pub fn manufacturer_string(&self) -> Result<Option<String>> {
        self.shared.with_handle(|handle| handle.manufacturer_string())
    }

    pub fn product_string(&self) -> Result<Option<String>> {
        self.shared.with_handle(|handle| handle.product_string())
    }

    pub fn serial_number_string(&self) -> Result<Option<String>> {
        self.shared
            .with_handle(|handle| handle.serial_number_string())
    }

    pub fn indexed_string(&self, index: i32) -> Result<Option<String>> {
        self.shared
            .with_handle(|handle| handle.indexed_string(index))
    }

    /// One-line summary of the descriptor strings.
    pub fn description(&self) -> Result<String> {
        let or_dash = |s: Option<String>| s.unwrap_or_else(|| "-".to_string());
        Ok(format!(
            "manufacturer: {} product: {} serial: {}",
            or_dash(self.manufacturer_string()?),
            or_dash(self.product_string()?),
            or_dash(self.serial_number_string()?),
        ))
    }

    /// Starts the background read loop.
    ///
    /// Each non-empty report is delivered through
    /// [`input_reports`](Self::input_reports). When a read fails, the loop
    /// emits [`disconnected`](Self::disconnected), hands disposal to a
    /// one-shot thread, and exits. Starting while already reading is a
    /// no-op; starting after disposal is an error.
    pub fn start_async_read(&self) -> Result<()> {
        if self.shared.disposed.load(Ordering::SeqCst) {
            return Err(Error::DeviceClosed);
        }
        if self.shared.reading.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // A loop left over from a previous start exits on the generation
        // check even if it never observed the cleared flag.
        let generation = self.shared.read_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut reader = self.shared.reader.lock().unwrap();
        let (exit_tx, exit_rx) = mpsc::channel();
        let shared = self.shared.clone();
        let handle = thread::spawn(move || {
            read_loop(&shared, generation);
            drop(exit_tx);
        });
        *reader = Some(ReaderState {
            thread: handle,
            exited: exit_rx,
        });
        Ok(())
    }

    /// Signals the read loop to exit after its current attempt; does not
    /// wait for it.
    pub fn stop_async_read(&self) {
        self.shared.reading.store(false, Ordering::SeqCst);
    }

    /// True while the background read loop runs. Turns false on
    /// [`stop_async_read`](Self::stop_async_read) and when the loop exits
    /// on its own, after a read failure or a panicking handler.
    pub fn is_reading(&self) -> bool {
        self.shared.reading.load(Ordering::SeqCst)
    }

    pub fn is_open(&self) -> bool {
        self.shared.handle.lock().unwrap().is_some()
    }

    pub fn report_length(&self) -> usize {
        self.shared.report_length
    }

    pub fn has_report_ids(&self) -> bool {
        self.shared.has_report_ids
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.shared.read_timeout_ms.load(Ordering::Relaxed) as u64)
    }

    /// Applies to the next read; callable while the read loop runs.
    pub fn set_read_timeout(&self, timeout: Duration) {
        self.shared
            .read_timeout_ms
            .store(timeout_ms(timeout), Ordering::Relaxed);
    }

    /// Input reports delivered by the background reader.
    pub fn input_reports(&self) -> &Event<Bytes> {
        &self.shared.input_reports
    }

    /// Fired once when the background reader hits a read failure.
    pub fn disconnected(&self) -> &Event<()> {
        &self.shared.disconnected
    }

    /// Stops the reader, closes the native handle, and marks the device
    /// disposed. Idempotent; safe to call concurrently and from event
    /// handlers running on the reader thread.
    pub fn dispose(&self) {
        self.shared.dispose();
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.shared.dispose();
    }
}

impl Shared {
    fn with_handle<R>(&self, f: impl FnOnce(&dyn HidHandle) -> Result<R>) -> Result<R> {
        let guard = self.handle.lock().unwrap();
        match guard.as_deref() {
            Some(handle) => f(handle),
            None => Err(Error::DeviceClosed),
        }
    }

    fn read_report(&self) -> Result<Bytes> {
        self.with_handle(|handle| {
            let len = if self.has_report_ids {
                self.report_length + 1
            } else {
                self.report_length
            };
            let mut buf = BytesMut::with_capacity(len);
            buf.resize(len, 0);
            let read = handle.read_timeout(&mut buf, self.read_timeout_ms.load(Ordering::Relaxed))?;
            buf.truncate(read);
            Ok(buf.freeze())
        })
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.reading.store(false, Ordering::SeqCst);

        let reader = self.reader.lock().unwrap().take();
        if let Some(ReaderState { thread, exited }) = reader {
            // The loop may be running one of our own event handlers right
            // now; waiting for it from that same thread would deadlock.
            if thread.thread().id() != std::thread::current().id() {
                match exited.recv_timeout(READER_EXIT_WAIT) {
                    Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                        let _ = thread.join();
                    }
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        log::warn!(
                            "read loop did not acknowledge the stop within {:?}, abandoning it",
                            READER_EXIT_WAIT
                        );
                    }
                }
            }
        }

        // Dropping the boxed handle closes the native device; the lock keeps
        // the close from overlapping an in-flight read or write.
        *self.handle.lock().unwrap() = None;
    }
}

/// Clears the reading flag when its loop exits by any path, a panicking
/// event handler included, unless a newer loop owns the flag by then.
struct ReadingGuard<'a> {
    shared: &'a Shared,
    generation: u64,
}

impl Drop for ReadingGuard<'_> {
    fn drop(&mut self) {
        if self.shared.read_generation.load(Ordering::SeqCst) == self.generation {
            self.shared.reading.store(false, Ordering::SeqCst);
        }
    }
}

fn read_loop(shared: &Arc<Shared>, generation: u64) {
    let _guard = ReadingGuard { shared, generation };
    while shared.reading.load(Ordering::SeqCst)
        && shared.read_generation.load(Ordering::SeqCst) == generation
    {
        match shared.read_report() {
            Ok(report) if report.is_empty() => thread::sleep(READER_IDLE_YIELD),
            Ok(report) => {
                log::trace!("read: {:02x?}", report.as_ref());
                shared.input_reports.emit(&report);
            }
            Err(e) => {
                if shared.disposed.load(Ordering::SeqCst) {
                    break;
                }
                log::error!("error in hid read loop: {:?}", e);
                shared.disconnected.emit(&());
                // dispose() waits on this thread, so teardown gets its own.
                let shared = shared.clone();
                thread::spawn(move || shared.dispose());
                break;
            }
        }
    }
}

fn timeout_ms(timeout: Duration) -> i32 {
    timeout.as_millis().min(i32::MAX as u128) as i32
}
