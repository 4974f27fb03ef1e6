#![deny(unsafe_code)]
//! TLS record buffers in main SRAM
//!
//! embedded-tls needs a read buffer for the largest record it accepts and a
//! write buffer for the largest record it sends. They are too large for the
//! task stack and live in `.bss` instead. Only one TLS connection exists at a
//! time, so one pair is handed out for the lifetime of the firmware.
//!
//! **Read buffer (18 KB)**: 16384 byte TLS 1.3 plaintext limit, plus the 5 byte
//! record header, the 16 byte AES-128-GCM tag and padding allowance.
//!
//! **Write buffer (16 KB)**: outgoing record sizes are under our control.

use static_cell::ConstStaticCell;

/// TLS read buffer size: 18 KB
const TLS_READ_BUF_SIZE: usize = 18 * 1024;

/// TLS write buffer size: 16 KB
const TLS_WRITE_BUF_SIZE: usize = 16 * 1024;

static TLS_READ_BUF: ConstStaticCell<[u8; TLS_READ_BUF_SIZE]> =
    ConstStaticCell::new([0; TLS_READ_BUF_SIZE]);

static TLS_WRITE_BUF: ConstStaticCell<[u8; TLS_WRITE_BUF_SIZE]> =
    ConstStaticCell::new([0; TLS_WRITE_BUF_SIZE]);

/// Claim the `(read, write)` buffer pair. Returns `None` once claimed.
pub fn take() -> Option<(&'static mut [u8], &'static mut [u8])> {
    let read = TLS_READ_BUF.try_take()?;
    let write = TLS_WRITE_BUF.try_take()?;
    Some((read.as_mut_slice(), write.as_mut_slice()))
}
