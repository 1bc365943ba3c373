use std::collections::VecDeque;
use std::os::fd::{BorrowedFd, OwnedFd};

use bytes::{Buf, BufMut};

use crate::error::{FrameError, Result};
use crate::fence::Fence;
use crate::flatten::{align4, Flattenable};

/// Size of the fixed tail: five `u32` words.
///
/// The two 64-bit fields are split into low/high words so the tail never
/// needs padding after the 4-byte-aligned fence region.
pub const POD_SIZE: usize = 5 * 4;

/// Identifies the buffer submission a release refers to.
///
/// Opaque to the channel: supplied by the sender and echoed back verbatim.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ReleaseCallbackId {
    pub buffer_id: i64,
    pub frame_number: u64,
}

impl ReleaseCallbackId {
    pub const fn new(buffer_id: i64, frame_number: u64) -> Self {
        Self {
            buffer_id,
            frame_number,
        }
    }
}

impl std::fmt::Display for ReleaseCallbackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}:{}", self.buffer_id, self.frame_number)
    }
}

/// The single wire unit of a release channel.
#[derive(Debug, Default)]
pub struct ReleaseMessage {
    pub release_callback_id: ReleaseCallbackId,
    pub release_fence: Fence,
    pub max_acquired_buffer_count: u32,
}

#[inline]
const fn low32(n: u64) -> u32 {
    n as u32
}

#[inline]
const fn high32(n: u64) -> u32 {
    (n >> 32) as u32
}

#[inline]
const fn to64(lo: u32, hi: u32) -> u64 {
    ((hi as u64) << 32) | lo as u64
}

impl ReleaseMessage {
    pub fn new(
        release_callback_id: ReleaseCallbackId,
        release_fence: Fence,
        max_acquired_buffer_count: u32,
    ) -> Self {
        Self {
            release_callback_id,
            release_fence,
            max_acquired_buffer_count,
        }
    }

    /// Size of the fixed tail that follows the fence region.
    pub const fn pod_size(&self) -> usize {
        POD_SIZE
    }
}

/// Encoded size of a release frame carrying `fence`.
///
/// The fence region is re-queried every time: "no fence" and "fence with a
/// descriptor" are free to encode to different sizes.
pub fn release_flattened_size(fence: &Fence) -> usize {
    align4(fence.flattened_size()) + POD_SIZE
}

/// Encode a release frame into the front of `dst` from borrowed parts.
///
/// Fails with [`FrameError::OutOfSpace`] if the tail does not fit; in that
/// case nothing past the fence region is written and `fds` is left as it was
/// on entry.
pub fn flatten_release<'a>(
    release_callback_id: ReleaseCallbackId,
    release_fence: &'a Fence,
    max_acquired_buffer_count: u32,
    dst: &mut [u8],
    fds: &mut Vec<BorrowedFd<'a>>,
) -> Result<usize> {
    let fds_on_entry = fds.len();
    let fence_len = release_fence.flatten(dst, fds)?;
    let offset = align4(fence_len);

    let available = dst.len().saturating_sub(offset);
    if available < POD_SIZE {
        fds.truncate(fds_on_entry);
        return Err(FrameError::OutOfSpace {
            needed: offset + POD_SIZE,
            available: dst.len(),
        });
    }

    let id = release_callback_id;
    let mut pod = &mut dst[offset..offset + POD_SIZE];
    pod.put_u32_ne(low32(id.buffer_id as u64));
    pod.put_u32_ne(high32(id.buffer_id as u64));
    pod.put_u32_ne(low32(id.frame_number));
    pod.put_u32_ne(high32(id.frame_number));
    pod.put_u32_ne(max_acquired_buffer_count);

    Ok(offset + POD_SIZE)
}

impl Flattenable for ReleaseMessage {
    fn flattened_size(&self) -> usize {
        release_flattened_size(&self.release_fence)
    }

    fn fd_count(&self) -> usize {
        self.release_fence.fd_count()
    }

    fn flatten<'a>(&'a self, dst: &mut [u8], fds: &mut Vec<BorrowedFd<'a>>) -> Result<usize> {
        flatten_release(
            self.release_callback_id,
            &self.release_fence,
            self.max_acquired_buffer_count,
            dst,
            fds,
        )
    }

    /// Decode from the front of `src`.
    ///
    /// A frame whose tail is missing or shorter than [`POD_SIZE`] still
    /// decodes: the id and buffer count keep their zero defaults. A newer
    /// sender may extend the tail, and an older one may not send it at all.
    fn unflatten(src: &[u8], fds: &mut VecDeque<OwnedFd>) -> Result<(Self, usize)> {
        let (release_fence, fence_len) = Fence::unflatten(src, fds)?;
        let offset = align4(fence_len);

        let mut message = Self {
            release_fence,
            ..Self::default()
        };

        let mut pod = src.get(offset..).unwrap_or(&[]);
        if pod.len() < message.pod_size() {
            return Ok((message, src.len().min(offset)));
        }

        let buffer_id_lo = pod.get_u32_ne();
        let buffer_id_hi = pod.get_u32_ne();
        let frame_number_lo = pod.get_u32_ne();
        let frame_number_hi = pod.get_u32_ne();
        message.release_callback_id = ReleaseCallbackId {
            buffer_id: to64(buffer_id_lo, buffer_id_hi) as i64,
            frame_number: to64(frame_number_lo, frame_number_hi),
        };
        message.max_acquired_buffer_count = pod.get_u32_ne();

        Ok((message, offset + POD_SIZE))
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::os::fd::AsRawFd;
    use std::os::unix::fs::MetadataExt;

    use super::*;

    fn file_fence() -> Fence {
        let path = std::env::temp_dir().join(format!(
            "releasechan-codec-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        let file = File::create(&path).expect("temp file should be creatable");
        let _ = std::fs::remove_file(&path);
        Fence::new(OwnedFd::from(file))
    }

    fn same_file(a: BorrowedFd<'_>, b: BorrowedFd<'_>) -> bool {
        let a = File::from(a.try_clone_to_owned().unwrap()).metadata().unwrap();
        let b = File::from(b.try_clone_to_owned().unwrap()).metadata().unwrap();
        (a.dev(), a.ino()) == (b.dev(), b.ino())
    }

    /// Flatten `message`, then hand duplicates of the lent descriptors to the decoder
    /// the way the kernel would on receive.
    fn encode(message: &ReleaseMessage) -> (Vec<u8>, VecDeque<OwnedFd>) {
        let mut buf = vec![0u8; message.flattened_size()];
        let mut fds = Vec::new();
        let written = message.flatten(&mut buf, &mut fds).unwrap();
        assert_eq!(written, buf.len());
        let owned = fds
            .iter()
            .map(|fd| fd.try_clone_to_owned().unwrap())
            .collect();
        (buf, owned)
    }

    #[test]
    fn flattened_size_is_fence_plus_pod() {
        let message = ReleaseMessage::default();
        assert_eq!(message.pod_size(), 20);
        assert_eq!(message.flattened_size(), 24);

        let with_fence = ReleaseMessage::new(ReleaseCallbackId::new(1, 2), file_fence(), 3);
        assert_eq!(with_fence.flattened_size(), 24);
        assert_eq!(with_fence.fd_count(), 1);
    }

    #[test]
    fn wire_layout_is_low_then_high_words() {
        let message = ReleaseMessage::new(
            ReleaseCallbackId::new(0x1122_3344_5566_7788, 0x99AA_BBCC_DDEE_FF00),
            Fence::none(),
            0x0102_0304,
        );
        let (buf, fds) = encode(&message);
        assert!(fds.is_empty());

        let words: Vec<u32> = buf
            .chunks_exact(4)
            .map(|w| u32::from_ne_bytes(w.try_into().unwrap()))
            .collect();
        assert_eq!(
            words,
            vec![
                0,
                0x5566_7788,
                0x1122_3344,
                0xDDEE_FF00,
                0x99AA_BBCC,
                0x0102_0304
            ]
        );
    }

    #[test]
    fn roundtrip_without_fence() {
        let message = ReleaseMessage::new(ReleaseCallbackId::new(-7, u64::MAX), Fence::none(), 0);
        let (buf, mut fds) = encode(&message);

        let (decoded, used) = ReleaseMessage::unflatten(&buf, &mut fds).unwrap();
        assert_eq!(used, buf.len());
        assert_eq!(decoded.release_callback_id, message.release_callback_id);
        assert!(!decoded.release_fence.is_valid());
        assert_eq!(decoded.max_acquired_buffer_count, 0);
    }

    #[test]
    fn roundtrip_with_fence_refers_to_same_file() {
        let message = ReleaseMessage::new(ReleaseCallbackId::new(1, 2), file_fence(), 5);
        let (buf, mut fds) = encode(&message);
        assert_eq!(fds.len(), 1);

        let (decoded, _) = ReleaseMessage::unflatten(&buf, &mut fds).unwrap();
        assert!(fds.is_empty());
        assert_eq!(decoded.release_callback_id, ReleaseCallbackId::new(1, 2));
        assert_eq!(decoded.max_acquired_buffer_count, 5);

        let original = message.release_fence.as_fd().unwrap();
        let received = decoded.release_fence.as_fd().unwrap();
        assert_ne!(original.as_raw_fd(), received.as_raw_fd());
        assert!(same_file(original, received));
    }

    #[test]
    fn roundtrip_buffer_count_extremes() {
        for count in [0, 1, 0x7FFF_FFFF, 0x8000_0000, u32::MAX] {
            let message =
                ReleaseMessage::new(ReleaseCallbackId::new(i64::MIN, 1), Fence::none(), count);
            let (buf, mut fds) = encode(&message);
            let (decoded, _) = ReleaseMessage::unflatten(&buf, &mut fds).unwrap();
            assert_eq!(decoded.max_acquired_buffer_count, count);
            assert_eq!(decoded.release_callback_id.buffer_id, i64::MIN);
        }
    }

    #[test]
    fn truncated_tail_decodes_with_zero_defaults() {
        let message = ReleaseMessage::new(ReleaseCallbackId::new(42, 43), file_fence(), 44);
        let (buf, mut fds) = encode(&message);

        let fence_only = align4(message.release_fence.flattened_size());
        let (decoded, used) = ReleaseMessage::unflatten(&buf[..fence_only], &mut fds).unwrap();
        assert_eq!(used, fence_only);
        assert_eq!(decoded.release_callback_id, ReleaseCallbackId::default());
        assert_eq!(decoded.max_acquired_buffer_count, 0);
        assert!(decoded.release_fence.is_valid());
    }

    #[test]
    fn partial_tail_decodes_with_zero_defaults() {
        let message = ReleaseMessage::new(ReleaseCallbackId::new(42, 43), Fence::none(), 44);
        let (buf, mut fds) = encode(&message);

        let (decoded, _) = ReleaseMessage::unflatten(&buf[..buf.len() - 1], &mut fds).unwrap();
        assert_eq!(decoded.release_callback_id, ReleaseCallbackId::default());
        assert_eq!(decoded.max_acquired_buffer_count, 0);
    }

    #[test]
    fn longer_tail_is_ignored() {
        let message = ReleaseMessage::new(ReleaseCallbackId::new(9, 10), Fence::none(), 11);
        let (mut buf, mut fds) = encode(&message);
        buf.extend_from_slice(&[0xAB; 8]);

        let (decoded, used) = ReleaseMessage::unflatten(&buf, &mut fds).unwrap();
        assert_eq!(used, 24);
        assert_eq!(decoded.release_callback_id, ReleaseCallbackId::new(9, 10));
        assert_eq!(decoded.max_acquired_buffer_count, 11);
    }

    #[test]
    fn flatten_into_short_buffer_is_out_of_space() {
        let message = ReleaseMessage::new(ReleaseCallbackId::new(1, 1), file_fence(), 1);
        for len in [4, 8, 23] {
            let mut buf = vec![0xEEu8; len];
            let mut fds = Vec::new();
            let err = message.flatten(&mut buf, &mut fds).unwrap_err();
            assert!(matches!(err, FrameError::OutOfSpace { .. }), "len {len}");
            assert!(fds.is_empty());
            assert!(buf[4..].iter().all(|b| *b == 0xEE));
        }
    }

    #[test]
    fn flatten_into_tiny_buffer_fails_in_fence_region() {
        let message = ReleaseMessage::default();
        let mut buf = [0u8; 2];
        let err = message.flatten(&mut buf, &mut Vec::new()).unwrap_err();
        assert_eq!(
            err,
            FrameError::OutOfSpace {
                needed: 4,
                available: 2
            }
        );
    }

    #[test]
    fn unflatten_empty_source_fails() {
        let err = ReleaseMessage::unflatten(&[], &mut VecDeque::new()).unwrap_err();
        assert!(matches!(err, FrameError::OutOfSpace { .. }));
    }

    #[test]
    fn lent_descriptor_is_the_fence_descriptor() {
        let message = ReleaseMessage::new(ReleaseCallbackId::new(3, 4), file_fence(), 2);
        let mut buf = vec![0u8; message.flattened_size()];
        let mut fds = Vec::new();
        message.flatten(&mut buf, &mut fds).unwrap();
        assert_eq!(
            fds[0].as_raw_fd(),
            message.release_fence.as_fd().unwrap().as_raw_fd()
        );
    }
}
