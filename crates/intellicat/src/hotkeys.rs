//! USB keyboard hotkeys for headless nodes: A starts a session, B dispenses a reward.
//!
//! Key events are read straight from the Linux input subsystem, so this works when the
//! daemon runs at boot with no terminal attached.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use intellicat_core::command::{CommandSender, OperatorCommand};

const EV_KEY: u16 = 0x01;
const KEY_A: u16 = 30;
const KEY_B: u16 = 48;
const KEY_DOWN: i32 = 1;

/// `_IOW('E', 0x90, int)`
const EVIOCGRAB: u32 = 0x4004_4590;

const EVENT_SIZE: usize = std::mem::size_of::<libc::input_event>();
const DEBOUNCE: Duration = Duration::from_millis(250);
const RETRY: Duration = Duration::from_secs(1);
const SEARCH_DIRS: [&str; 2] = ["/dev/input/by-id", "/dev/input/by-path"];

/// The fields of one `struct input_event` that matter here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub kind: u16,
    pub code: u16,
    pub value: i32,
}

impl KeyEvent {
    /// The timestamp leads the record and is skipped; type, code and value fill the last 8 bytes.
    fn from_raw(raw: &[u8; EVENT_SIZE]) -> Self {
        let t = EVENT_SIZE - 8;
        Self {
            kind: u16::from_ne_bytes([raw[t], raw[t + 1]]),
            code: u16::from_ne_bytes([raw[t + 2], raw[t + 3]]),
            value: i32::from_ne_bytes([raw[t + 4], raw[t + 5], raw[t + 6], raw[t + 7]]),
        }
    }
}

/// Turns key-down events into commands, ignoring a key pressed again within 250ms.
#[derive(Debug, Default)]
pub struct HotkeyDecoder {
    last_press: HashMap<u16, Instant>,
}

impl HotkeyDecoder {
    pub fn feed(&mut self, event: KeyEvent, at: Instant) -> Option<OperatorCommand> {
        if event.kind != EV_KEY || event.value != KEY_DOWN {
            return None;
        }
        let command = match event.code {
            KEY_A => OperatorCommand::Start,
            KEY_B => OperatorCommand::Dispense,
            _ => return None,
        };
        if self
            .last_press
            .get(&event.code)
            .is_some_and(|last| at.duration_since(*last) < DEBOUNCE)
        {
            return None;
        }
        self.last_press.insert(event.code, at);
        Some(command)
    }
}

/// Forward hotkey presses until EOF, a read error, or the control loop going away.
///
/// Returns the number of commands queued.
pub fn read_hotkeys<R: Read>(mut reader: R, sender: &CommandSender) -> io::Result<usize> {
    let mut decoder = HotkeyDecoder::default();
    let mut raw = [0u8; EVENT_SIZE];
    let mut queued = 0;

    loop {
        match reader.read_exact(&mut raw) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(queued),
            Err(e) => return Err(e),
        }
        let Some(command) = decoder.feed(KeyEvent::from_raw(&raw), Instant::now()) else {
            continue;
        };
        info!(command = %command, "Hotkey pressed");
        if !sender.send(command) {
            return Ok(queued);
        }
        queued += 1;
    }
}

/// First entry whose name contains `kbd`, searching `dirs` in order and names sorted.
fn find_keyboard(dirs: &[&Path]) -> Option<PathBuf> {
    dirs.iter().find_map(|dir| {
        let entries = std::fs::read_dir(dir).ok()?;
        let mut candidates: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.contains("kbd"))
            })
            .collect();
        candidates.sort();
        candidates.into_iter().next()
    })
}

/// Take the keyboard exclusively so presses do not also land on a console.
fn grab(file: &File) {
    // SAFETY: EVIOCGRAB takes an int argument and the fd is open for the whole call.
    let rc = unsafe { libc::ioctl(file.as_raw_fd(), EVIOCGRAB as _, 1 as libc::c_int) };
    if rc != 0 {
        debug!(error = %io::Error::last_os_error(), "Keyboard grab failed, reading anyway");
    }
}

/// Listen on the calling thread, reopening the keyboard after errors or unplugging.
///
/// `device` pins a specific event device; otherwise one is discovered under `/dev/input`.
pub fn listen(device: Option<PathBuf>, sender: &CommandSender) {
    let search: Vec<&Path> = SEARCH_DIRS.iter().map(Path::new).collect();
    let mut waiting_logged = false;

    while !sender.is_closed() {
        let found = match &device {
            Some(path) => path.exists().then(|| path.clone()),
            None => find_keyboard(&search),
        };
        let Some(path) = found else {
            if !waiting_logged {
                info!("Waiting for USB keyboard");
                waiting_logged = true;
            }
            std::thread::sleep(RETRY);
            continue;
        };
        waiting_logged = false;

        match File::open(&path) {
            Ok(file) => {
                info!(device = %path.display(), "Keyboard hotkeys enabled");
                grab(&file);
                match read_hotkeys(&file, sender) {
                    Ok(queued) => info!(device = %path.display(), queued, "Keyboard closed"),
                    Err(e) => warn!(device = %path.display(), error = %e, "Keyboard read failed"),
                }
            }
            Err(e) => warn!(device = %path.display(), error = %e, "Failed to open keyboard"),
        }
        std::thread::sleep(RETRY);
    }
    debug!("Control loop gone, hotkeys stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use intellicat_core::command::CommandChannel;
    use std::io::Cursor;
    use tempfile::tempdir;

    fn key(code: u16, value: i32) -> KeyEvent {
        KeyEvent {
            kind: EV_KEY,
            code,
            value,
        }
    }

    fn raw(event: KeyEvent) -> Vec<u8> {
        let mut bytes = vec![0u8; EVENT_SIZE - 8];
        bytes.extend_from_slice(&event.kind.to_ne_bytes());
        bytes.extend_from_slice(&event.code.to_ne_bytes());
        bytes.extend_from_slice(&event.value.to_ne_bytes());
        bytes
    }

    #[test]
    fn test_decoder_maps_presses() {
        let mut decoder = HotkeyDecoder::default();
        let t0 = Instant::now();

        assert_eq!(decoder.feed(key(KEY_A, 1), t0), Some(OperatorCommand::Start));
        assert_eq!(decoder.feed(key(KEY_A, 0), t0), None);
        assert_eq!(decoder.feed(key(KEY_B, 1), t0), Some(OperatorCommand::Dispense));
        // Auto-repeat (value 2) and other keys are ignored.
        assert_eq!(decoder.feed(key(KEY_B, 2), t0), None);
        assert_eq!(decoder.feed(key(28, 1), t0), None);
        let syn = KeyEvent {
            kind: 0,
            code: KEY_A,
            value: 1,
        };
        assert_eq!(decoder.feed(syn, t0), None);
    }

    #[test]
    fn test_decoder_debounces_each_key() {
        let mut decoder = HotkeyDecoder::default();
        let t0 = Instant::now();

        assert!(decoder.feed(key(KEY_A, 1), t0).is_some());
        assert!(decoder.feed(key(KEY_A, 1), t0 + Duration::from_millis(100)).is_none());
        assert!(decoder.feed(key(KEY_B, 1), t0 + Duration::from_millis(100)).is_some());
        assert!(decoder.feed(key(KEY_A, 1), t0 + Duration::from_millis(300)).is_some());
    }

    #[test]
    fn test_event_stream_becomes_commands() {
        let (sender, mut channel) = CommandChannel::new();
        let mut stream = Vec::new();
        stream.extend(raw(key(KEY_A, 1)));
        stream.extend(raw(key(KEY_A, 0)));
        stream.extend(raw(KeyEvent {
            kind: 0,
            code: 0,
            value: 0,
        }));
        stream.extend(raw(key(KEY_B, 1)));
        // A truncated record at the end is treated as EOF.
        stream.extend_from_slice(&[0u8; 3]);

        let queued = read_hotkeys(Cursor::new(stream), &sender).unwrap();
        assert_eq!(queued, 2);
        assert_eq!(
            channel.drain(),
            vec![OperatorCommand::Start, OperatorCommand::Dispense]
        );
    }

    #[test]
    fn test_find_keyboard_prefers_by_id() {
        let dir = tempdir().expect("Failed to create temp dir");
        let by_id = dir.path().join("by-id");
        let by_path = dir.path().join("by-path");
        std::fs::create_dir_all(&by_id).unwrap();
        std::fs::create_dir_all(&by_path).unwrap();
        let missing = dir.path().join("missing");

        std::fs::write(by_path.join("platform-usb-0:1-event-kbd"), b"").unwrap();
        std::fs::write(by_id.join("usb-Mouse-event-mouse"), b"").unwrap();
        assert_eq!(
            find_keyboard(&[missing.as_path(), by_id.as_path(), by_path.as_path()]),
            Some(by_path.join("platform-usb-0:1-event-kbd"))
        );

        std::fs::write(by_id.join("usb-Zed-event-kbd"), b"").unwrap();
        std::fs::write(by_id.join("usb-Acme-event-kbd"), b"").unwrap();
        assert_eq!(
            find_keyboard(&[by_id.as_path(), by_path.as_path()]),
            Some(by_id.join("usb-Acme-event-kbd"))
        );

        assert_eq!(find_keyboard(&[missing.as_path()]), None);
    }
}
