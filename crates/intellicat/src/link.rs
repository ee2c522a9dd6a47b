//! Serial-device peer link.
//!
//! A background task owns the device: it waits for the device node to appear, opens it,
//! pumps bytes both ways and reopens it after any error. Reads run on their own thread.
//! The control loop only touches the in-memory queues through [`DeviceLink`], so it never
//! blocks on the radio.

use std::io::{self, Read};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, info, warn};

use intellicat_core::link::{LinkError, LinkTransport};

use crate::config::LinkConfig;

const READ_CHUNK: usize = 256;

/// Non-blocking handle to the link task.
pub struct DeviceLink {
    inbound: mpsc::UnboundedReceiver<Vec<u8>>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    connected: Arc<AtomicBool>,
}

impl DeviceLink {
    /// Start the link task for the configured device.
    pub fn spawn(config: &LinkConfig) -> Self {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));

        tokio::spawn(maintain_device(
            config.device.clone(),
            config.reconnect_interval(),
            in_tx,
            out_rx,
            Arc::clone(&connected),
        ));

        Self {
            inbound: in_rx,
            outbound: out_tx,
            connected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl LinkTransport for DeviceLink {
    fn read_available(&mut self) -> Result<Vec<u8>, LinkError> {
        let mut bytes = Vec::new();
        loop {
            match self.inbound.try_recv() {
                Ok(chunk) => bytes.extend_from_slice(&chunk),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if bytes.is_empty() {
                        return Err(LinkError::Closed);
                    }
                    break;
                }
            }
        }

        if bytes.is_empty() && !self.is_connected() {
            return Err(LinkError::Unavailable);
        }
        Ok(bytes)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        if !self.is_connected() {
            return Err(LinkError::Unavailable);
        }
        self.outbound
            .send(bytes.to_vec())
            .map_err(|_| LinkError::Closed)
    }
}

async fn maintain_device(
    device: PathBuf,
    retry: Duration,
    inbound: mpsc::UnboundedSender<Vec<u8>>,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    connected: Arc<AtomicBool>,
) {
    let mut waiting_logged = false;

    loop {
        if inbound.is_closed() {
            debug!("Link handle dropped, stopping link task");
            return;
        }

        if !device.exists() {
            if !waiting_logged {
                info!(device = %device.display(), "Waiting for link device");
                waiting_logged = true;
            }
            tokio::time::sleep(retry).await;
            continue;
        }

        let (reader, writer) = match open_device(&device).await {
            Ok(handles) => handles,
            Err(e) => {
                warn!(device = %device.display(), error = %e, "Failed to open link device");
                tokio::time::sleep(retry).await;
                continue;
            }
        };

        waiting_logged = false;
        info!(device = %device.display(), "Link device open");
        let result = pump(reader, writer, &inbound, &mut outbound, &connected).await;
        connected.store(false, Ordering::SeqCst);

        match result {
            Ok(()) => info!(device = %device.display(), "Link device closed"),
            Err(e) => warn!(device = %device.display(), error = %e, "Link device error"),
        }
        tokio::time::sleep(retry).await;
    }
}

/// Open the device twice: a blocking read handle and an async write handle.
///
/// A single handle cannot write while a read is parked on a silent line.
async fn open_device(device: &Path) -> io::Result<(std::fs::File, File)> {
    let reader = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NOCTTY)
        .open(device)
        .await?
        .into_std()
        .await;
    make_raw(&reader)?;

    let writer = OpenOptions::new()
        .write(true)
        .custom_flags(libc::O_NOCTTY)
        .open(device)
        .await?;
    Ok((reader, writer))
}

/// Put a tty into raw mode so the line discipline neither echoes nor rewrites bytes.
/// Anything that is not a tty is left alone.
fn make_raw(file: &std::fs::File) -> io::Result<()> {
    let fd = file.as_raw_fd();
    // SAFETY: `fd` stays open for the lifetime of `file`, and termios is plain data.
    unsafe {
        if libc::isatty(fd) == 0 {
            return Ok(());
        }
        let mut termios: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(fd, &mut termios) != 0 {
            return Err(io::Error::last_os_error());
        }
        libc::cfmakeraw(&mut termios);
        if libc::tcsetattr(fd, libc::TCSANOW, &termios) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Read on a dedicated thread until EOF, an error, or the pump going away.
///
/// The thread is not on the runtime's blocking pool, so a read parked on a silent line
/// never holds up runtime shutdown.
fn spawn_reader<R>(
    mut reader: R,
    inbound: mpsc::UnboundedSender<Vec<u8>>,
) -> io::Result<oneshot::Receiver<io::Result<()>>>
where
    R: Read + Send + 'static,
{
    let (done_tx, done_rx) = oneshot::channel();
    std::thread::Builder::new()
        .name("link-reader".into())
        .spawn(move || {
            let mut buf = [0u8; READ_CHUNK];
            let result = loop {
                match reader.read(&mut buf) {
                    Ok(0) => break Ok(()),
                    Ok(n) => {
                        if done_tx.is_closed() || inbound.send(buf[..n].to_vec()).is_err() {
                            break Ok(());
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => break Err(e),
                }
            };
            let _ = done_tx.send(result);
        })?;
    Ok(done_rx)
}

/// Shuttle bytes between an open device and the queues until either side ends or fails.
///
/// Writes queued while disconnected are discarded before the flag goes up.
async fn pump<R, W>(
    reader: R,
    mut writer: W,
    inbound: &mpsc::UnboundedSender<Vec<u8>>,
    outbound: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    connected: &AtomicBool,
) -> io::Result<()>
where
    R: Read + Send + 'static,
    W: AsyncWrite + Unpin,
{
    while outbound.try_recv().is_ok() {}

    let mut reader_done = spawn_reader(reader, inbound.clone())?;
    connected.store(true, Ordering::SeqCst);

    loop {
        tokio::select! {
            done = &mut reader_done => {
                return done.unwrap_or_else(|_| Err(io::Error::other("link reader stopped")));
            }
            next = outbound.recv() => {
                let Some(bytes) = next else {
                    return Ok(());
                };
                writer.write_all(&bytes).await?;
                writer.flush().await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;
    use std::io::Write;
    use std::os::fd::FromRawFd;
    use std::os::unix::net::UnixStream;
    use tempfile::tempdir;
    use tokio::io::AsyncReadExt;

    struct Harness {
        link: DeviceLink,
        in_tx: mpsc::UnboundedSender<Vec<u8>>,
        sent: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
    }

    fn harness() -> Harness {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        Harness {
            link: DeviceLink {
                inbound: in_rx,
                outbound: out_tx,
                connected: Arc::new(AtomicBool::new(false)),
            },
            in_tx,
            sent: Some(out_rx),
        }
    }

    #[test]
    fn test_unavailable_until_connected() {
        let mut h = harness();
        assert_eq!(h.link.read_available(), Err(LinkError::Unavailable));
        assert_eq!(h.link.write(b"PI1_DONE\n"), Err(LinkError::Unavailable));

        h.link.connected.store(true, Ordering::SeqCst);
        assert_eq!(h.link.read_available(), Ok(Vec::new()));
        assert!(h.link.write(b"PI1_DONE\n").is_ok());
        let mut out = h.sent.take().unwrap();
        assert_eq!(out.try_recv().unwrap(), b"PI1_DONE\n".to_vec());
    }

    #[test]
    fn test_buffered_bytes_survive_disconnect() {
        let mut h = harness();
        h.in_tx.send(b"PI2_".to_vec()).unwrap();
        h.in_tx.send(b"DONE\n".to_vec()).unwrap();

        assert_eq!(h.link.read_available().unwrap(), b"PI2_DONE\n".to_vec());
        assert_eq!(h.link.read_available(), Err(LinkError::Unavailable));
    }

    #[test]
    fn test_closed_when_task_gone() {
        let mut h = harness();
        drop(h.in_tx);
        assert_eq!(h.link.read_available(), Err(LinkError::Closed));
    }

    #[tokio::test]
    async fn test_pump_moves_bytes_both_ways() {
        let (ours, mut theirs) = UnixStream::pair().unwrap();
        let (writer, mut peer_reader) = tokio::io::duplex(64);
        let (in_tx, mut in_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));

        out_tx.send(b"stale\n".to_vec()).unwrap();
        let flag = Arc::clone(&connected);
        let task =
            tokio::spawn(async move { pump(ours, writer, &in_tx, &mut out_rx, &flag).await });

        theirs.write_all(b"PI2_DONE\n").unwrap();
        let received = in_rx.recv().await.unwrap();
        assert_eq!(received, b"PI2_DONE\n".to_vec());
        assert!(connected.load(Ordering::SeqCst));

        out_tx.send(b"PI1_DONE\n".to_vec()).unwrap();
        let mut buf = [0u8; 9];
        peer_reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"PI1_DONE\n");

        drop(theirs);
        assert!(task.await.unwrap().is_ok());
    }

    /// A pseudo-terminal pair: the master end and the path of the slave end.
    fn open_pty() -> (std::fs::File, PathBuf) {
        // SAFETY: the master fd is checked before use and owned by the returned File.
        unsafe {
            let master = libc::posix_openpt(libc::O_RDWR | libc::O_NOCTTY);
            assert!(master >= 0, "posix_openpt failed");
            assert_eq!(libc::grantpt(master), 0);
            assert_eq!(libc::unlockpt(master), 0);
            let flags = libc::fcntl(master, libc::F_GETFL);
            assert_eq!(libc::fcntl(master, libc::F_SETFL, flags | libc::O_NONBLOCK), 0);

            let mut name = [0 as libc::c_char; 128];
            assert_eq!(libc::ptsname_r(master, name.as_mut_ptr(), name.len()), 0);
            let path = CStr::from_ptr(name.as_ptr()).to_string_lossy().into_owned();
            (std::fs::File::from_raw_fd(master), PathBuf::from(path))
        }
    }

    async fn read_master_until(master: &mut std::fs::File, needle: &[u8]) -> Vec<u8> {
        let mut seen = Vec::new();
        let mut buf = [0u8; 64];
        for _ in 0..200 {
            match master.read(&mut buf) {
                Ok(n) if n > 0 => {
                    seen.extend_from_slice(&buf[..n]);
                    if seen.windows(needle.len()).any(|w| w == needle) {
                        break;
                    }
                }
                Ok(_) => break,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Err(e) => panic!("pty master read failed: {e}"),
            }
        }
        seen
    }

    #[tokio::test]
    async fn test_tty_write_goes_out_while_peer_is_silent() {
        let (mut master, slave) = open_pty();
        let (reader, writer) = open_device(&slave).await.unwrap();
        let (in_tx, mut in_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&connected);
        let task =
            tokio::spawn(async move { pump(reader, writer, &in_tx, &mut out_rx, &flag).await });

        // The read side is parked on a line that has sent nothing yet.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(connected.load(Ordering::SeqCst));

        out_tx.send(b"PI1_DONE\n".to_vec()).unwrap();
        let seen = read_master_until(&mut master, b"PI1_DONE\n").await;
        assert!(
            seen.windows(9).any(|w| w == b"PI1_DONE\n"),
            "master saw {seen:?}"
        );

        master.write_all(b"PI2_DONE\n").unwrap();
        let mut received = Vec::new();
        while received.len() < 9 {
            let chunk = tokio::time::timeout(Duration::from_secs(2), in_rx.recv())
                .await
                .expect("no bytes from the tty")
                .unwrap();
            received.extend_from_slice(&chunk);
        }
        assert_eq!(received, b"PI2_DONE\n".to_vec());

        drop(master);
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("pump kept running after hangup")
            .unwrap()
            .ok();
    }

    #[tokio::test]
    async fn test_spawn_waits_for_missing_device() {
        let dir = tempdir().expect("Failed to create temp dir");
        let config = LinkConfig {
            device: dir.path().join("rfcomm9"),
            reconnect_secs: 1,
        };
        let mut link = DeviceLink::spawn(&config);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!link.is_connected());
        assert_eq!(link.read_available(), Err(LinkError::Unavailable));
    }
}
