//! One-time handoff container for moving an endpoint to another process.
//!
//! A [`Parcel`] is an ordered list of UTF-8 strings and owned descriptors.
//! Values are read back in the order they were written. On the wire a parcel
//! is a single seqpacket message: a JSON header describing the entries, with
//! the descriptors attached as `SCM_RIGHTS` in entry order.

use std::collections::VecDeque;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

use releasechan_transport::{recv_with_fds, send_with_fds};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ChannelError, Result};

/// Largest encoded parcel header accepted.
pub const MAX_PARCEL_SIZE: usize = 64 * 1024;
/// Largest number of descriptors one parcel may carry.
pub const MAX_PARCEL_FDS: usize = 16;

#[derive(Debug)]
enum Entry {
    Utf8(String),
    Fd(OwnedFd),
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum WireEntry {
    Utf8(String),
    Fd,
}

#[derive(Debug, Serialize, Deserialize)]
struct ParcelHeader {
    entries: Vec<WireEntry>,
}

/// Ordered container of strings and descriptors.
#[derive(Debug, Default)]
pub struct Parcel {
    entries: VecDeque<Entry>,
}

impl Parcel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unread entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn write_utf8(&mut self, value: &str) {
        self.entries.push_back(Entry::Utf8(value.to_string()));
    }

    /// Append a duplicate of `fd`; the caller keeps its own descriptor.
    pub fn write_fd(&mut self, fd: BorrowedFd<'_>) -> Result<()> {
        let fd = fd.try_clone_to_owned()?;
        self.entries.push_back(Entry::Fd(fd));
        Ok(())
    }

    pub fn read_utf8(&mut self) -> Result<String> {
        match self.entries.pop_front() {
            Some(Entry::Utf8(value)) => Ok(value),
            Some(entry @ Entry::Fd(_)) => {
                self.entries.push_front(entry);
                Err(ChannelError::Parcel(
                    "expected a string, found a descriptor".to_string(),
                ))
            }
            None => Err(ChannelError::Parcel(
                "expected a string, parcel is empty".to_string(),
            )),
        }
    }

    pub fn read_fd(&mut self) -> Result<OwnedFd> {
        match self.entries.pop_front() {
            Some(Entry::Fd(fd)) => Ok(fd),
            Some(entry @ Entry::Utf8(_)) => {
                self.entries.push_front(entry);
                Err(ChannelError::Parcel(
                    "expected a descriptor, found a string".to_string(),
                ))
            }
            None => Err(ChannelError::Parcel(
                "expected a descriptor, parcel is empty".to_string(),
            )),
        }
    }

    /// Send the parcel as one message on `sock`.
    ///
    /// The parcel keeps its descriptors; the receiver gets duplicates.
    pub fn send(&self, sock: impl AsFd) -> Result<()> {
        let mut fds = Vec::new();
        let entries = self
            .entries
            .iter()
            .map(|entry| match entry {
                Entry::Utf8(value) => WireEntry::Utf8(value.clone()),
                Entry::Fd(fd) => {
                    fds.push(fd.as_fd());
                    WireEntry::Fd
                }
            })
            .collect();

        if fds.len() > MAX_PARCEL_FDS {
            return Err(ChannelError::Parcel(format!(
                "parcel carries {} descriptors (max {MAX_PARCEL_FDS})",
                fds.len()
            )));
        }

        let payload = serde_json::to_vec(&ParcelHeader { entries })?;
        if payload.len() > MAX_PARCEL_SIZE {
            return Err(ChannelError::Parcel(format!(
                "parcel header is {} bytes (max {MAX_PARCEL_SIZE})",
                payload.len()
            )));
        }

        send_with_fds(sock.as_fd(), &payload, &fds)?;
        debug!(
            entries = self.entries.len(),
            fds = fds.len(),
            "sent parcel"
        );
        Ok(())
    }

    /// Receive one parcel from `sock`.
    pub fn recv(sock: impl AsFd) -> Result<Self> {
        let mut buf = vec![0u8; MAX_PARCEL_SIZE];
        let received = recv_with_fds(sock.as_fd(), &mut buf, MAX_PARCEL_FDS)?;

        if received.len == 0 {
            return Err(ChannelError::PeerClosed);
        }
        if received.truncated {
            return Err(ChannelError::Parcel(
                "parcel exceeds the receive buffer".to_string(),
            ));
        }

        let header: ParcelHeader = serde_json::from_slice(&buf[..received.len])?;
        let expected = header
            .entries
            .iter()
            .filter(|entry| matches!(entry, WireEntry::Fd))
            .count();
        if expected != received.fds.len() {
            return Err(ChannelError::Parcel(format!(
                "parcel header names {expected} descriptors, {} arrived",
                received.fds.len()
            )));
        }

        let mut fds = received.fds.into_iter();
        let mut entries = VecDeque::with_capacity(header.entries.len());
        for entry in header.entries {
            let entry = match entry {
                WireEntry::Utf8(value) => Entry::Utf8(value),
                WireEntry::Fd => match fds.next() {
                    Some(fd) => Entry::Fd(fd),
                    None => {
                        return Err(ChannelError::Parcel("descriptor list ran short".to_string()))
                    }
                },
            };
            entries.push_back(entry);
        }

        debug!(entries = entries.len(), fds = expected, "received parcel");
        Ok(Self { entries })
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::{Read, Seek, SeekFrom, Write};
    use std::os::fd::{AsFd, AsRawFd};

    use releasechan_transport::seqpacket_pair;

    use super::*;
    use crate::channel::open;
    use crate::endpoint::ProducerEndpoint;
    use crate::ReleaseCallbackId;

    #[test]
    fn values_read_back_in_order() {
        let file = File::open("/dev/null").unwrap();
        let mut parcel = Parcel::new();
        parcel.write_utf8("first");
        parcel.write_fd(file.as_fd()).unwrap();
        parcel.write_utf8("second");

        assert_eq!(parcel.len(), 3);
        assert_eq!(parcel.read_utf8().unwrap(), "first");
        let fd = parcel.read_fd().unwrap();
        assert_ne!(fd.as_raw_fd(), file.as_raw_fd());
        assert_eq!(parcel.read_utf8().unwrap(), "second");
        assert!(parcel.is_empty());
    }

    #[test]
    fn type_mismatch_leaves_entry_in_place() {
        let mut parcel = Parcel::new();
        parcel.write_utf8("name");

        assert!(matches!(parcel.read_fd(), Err(ChannelError::Parcel(_))));
        assert_eq!(parcel.read_utf8().unwrap(), "name");
        assert!(matches!(parcel.read_utf8(), Err(ChannelError::Parcel(_))));
    }

    #[test]
    fn send_and_recv_over_socket() {
        let (a, b) = seqpacket_pair().unwrap();

        let path = std::env::temp_dir().join(format!("releasechan-parcel-{}", std::process::id()));
        let mut file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        let _ = std::fs::remove_file(&path);
        file.write_all(b"parcel").unwrap();

        let mut parcel = Parcel::new();
        parcel.write_utf8("surface");
        parcel.write_fd(file.as_fd()).unwrap();
        parcel.send(&a).unwrap();

        let mut received = Parcel::recv(&b).unwrap();
        assert_eq!(received.read_utf8().unwrap(), "surface");
        let mut shared = File::from(received.read_fd().unwrap());
        shared.seek(SeekFrom::Start(0)).unwrap();
        let mut contents = String::new();
        shared.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "parcel");
    }

    #[test]
    fn too_many_descriptors_rejected() {
        let file = File::open("/dev/null").unwrap();
        let mut parcel = Parcel::new();
        for _ in 0..=MAX_PARCEL_FDS {
            parcel.write_fd(file.as_fd()).unwrap();
        }
        let (a, _b) = seqpacket_pair().unwrap();
        assert!(matches!(parcel.send(&a), Err(ChannelError::Parcel(_))));
    }

    #[test]
    fn garbage_header_is_json_error() {
        let (a, b) = seqpacket_pair().unwrap();
        send_with_fds(a.as_fd(), b"not json", &[]).unwrap();
        assert!(matches!(Parcel::recv(&b), Err(ChannelError::Json(_))));
    }

    #[test]
    fn producer_handoff_keeps_channel_working() {
        let (consumer, producer) = open("handoff").unwrap();
        let (a, b) = seqpacket_pair().unwrap();

        let mut parcel = Parcel::new();
        producer.write_to_parcel(&mut parcel).unwrap();
        parcel.send(&a).unwrap();
        drop(parcel);
        drop(producer);

        let mut received = Parcel::recv(&b).unwrap();
        let producer = ProducerEndpoint::read_from_parcel(&mut received).unwrap();
        assert_eq!(producer.name(), "handoff");

        producer
            .write_release_fence(ReleaseCallbackId::new(42, 7), None, 2)
            .unwrap();
        let message = consumer.read_release_fence().unwrap().unwrap();
        assert_eq!(message.release_callback_id, ReleaseCallbackId::new(42, 7));
    }
}
